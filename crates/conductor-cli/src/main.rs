use clap::{Parser, Subcommand};
use conductor_agent::{from_config, LlmAgent, LlmBackend, LlmReasoner, ModelConfig};
use conductor_core::OutcomeStatus;
use conductor_orchestrator::{Conductor, OrchestratorConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor - multi-agent request orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request to completion and print the result
    Run {
        /// The user request
        request: String,
        /// Print the full session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage agents
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List configured agents, including the generic fallback
    List,
}

#[derive(Deserialize)]
struct ConductorConfig {
    model: ModelConfig,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default)]
    generic_agent: GenericAgentConfig,
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

#[derive(Deserialize, Default)]
struct GenericAgentConfig {
    #[serde(default)]
    background: String,
}

#[derive(Deserialize)]
struct AgentConfig {
    name: String,
    description: String,
    /// Defaults to the agent name.
    topic: Option<String>,
    #[serde(default)]
    background: String,
}

async fn load_config(path: &Path) -> anyhow::Result<ConductorConfig> {
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    let mut config: ConductorConfig = toml::from_str(&config_str)?;
    if let Ok(key) = std::env::var("CONDUCTOR_API_KEY") {
        config.model = config.model.with_default_api_key(&key);
    }
    Ok(config)
}

fn build_conductor(config: ConductorConfig) -> anyhow::Result<Conductor> {
    let backend: Arc<dyn LlmBackend> = Arc::from(from_config(&config.model));
    let conductor = Conductor::new(
        config.orchestrator,
        Arc::new(LlmReasoner::new(Arc::clone(&backend))),
        Arc::new(LlmAgent::new(
            conductor_core::GENERIC_AGENT,
            config.generic_agent.background,
            Arc::clone(&backend),
        )),
    );
    for agent in config.agents {
        let executor = Arc::new(LlmAgent::new(
            agent.name.as_str(),
            agent.background,
            Arc::clone(&backend),
        ));
        if !conductor.register_agent(
            &agent.name,
            &agent.description,
            agent.topic.as_deref(),
            executor,
        ) {
            anyhow::bail!("agent name '{}' is reserved", agent.name);
        }
    }
    Ok(conductor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let conductor = build_conductor(config)?;

    match cli.command {
        Commands::Run { request, json } => {
            info!(agents = conductor.registry().snapshot().len(), "Running request");
            let report = conductor.submit(&request).await?;
            conductor.shutdown().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.result);
            }
            if report.status != OutcomeStatus::Completed {
                anyhow::bail!(
                    "session {} ended {:?} after {} attempt(s)",
                    report.correlation_id,
                    report.status,
                    report.attempts
                );
            }
        }
        Commands::Agents { action } => match action {
            AgentsAction::List => {
                let snapshot = conductor.registry().snapshot();
                println!("Registered agents ({}):", snapshot.len());
                for entry in snapshot.entries() {
                    println!("  {} [{}] - {}", entry.name, entry.topic, entry.description);
                }
            }
        },
    }

    Ok(())
}
