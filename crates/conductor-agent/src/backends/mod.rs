pub mod openai;

use crate::config::ModelConfig;
use crate::failover::FailoverBackend;
use async_trait::async_trait;
use conductor_core::ConductorResult;
use openai::OpenAiBackend;

/// A text-completion capability behind the reasoner and the LLM agents.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `LlmBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in [`from_config`]
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single-turn completion of `prompt` under an optional system prompt.
    async fn complete(&self, system_prompt: Option<&str>, prompt: &str) -> ConductorResult<String>;
}

/// Build the backend described by `config`.
///
/// Fallback models or an explicit retry policy wrap the primary backend in a
/// [`FailoverBackend`].
pub fn from_config(config: &ModelConfig) -> Box<dyn LlmBackend> {
    if config.fallback_models.is_empty() && config.retry_policy.is_none() {
        return Box::new(OpenAiBackend::new(config.clone()));
    }

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|m| Box::new(OpenAiBackend::new(m.clone())) as Box<dyn LlmBackend>)
        .collect();
    Box::new(FailoverBackend::new(
        Box::new(OpenAiBackend::new(config.clone())),
        fallbacks,
        config.retry_policy.clone().unwrap_or_default(),
    ))
}
