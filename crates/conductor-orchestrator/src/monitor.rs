use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Delegation counters tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Subtasks sent to the agent.
    pub dispatched: u32,
    /// Results flagged as successful.
    pub succeeded: u32,
    /// Delegations that did not succeed, timeouts included.
    pub failed: u32,
    /// Error notifications the agent published.
    pub error_notifications: u32,
    /// Total time spent waiting on the agent's results.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Real-time snapshot of one agent as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub in_flight: u32,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            in_flight: 0,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
            last_activity: None,
        }
    }
}

/// Tracks delegation state and metrics for every agent the orchestrator talks to.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A subtask was dispatched to `agent`.
    pub async fn start_delegation(&self, agent: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState::new(agent));
        state.in_flight += 1;
        state.metrics.dispatched += 1;
        state.status = WorkerStatus::Working;
        state.last_activity = Some(Utc::now());
    }

    /// A delegation to `agent` resolved (or timed out).
    pub async fn finish_delegation(&self, agent: &str, succeeded: bool, duration_ms: u64) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState::new(agent));
        state.in_flight = state.in_flight.saturating_sub(1);
        state.metrics.duration_ms += duration_ms;
        if succeeded {
            state.metrics.succeeded += 1;
        } else {
            state.metrics.failed += 1;
        }
        state.status = match (state.in_flight, succeeded) {
            (0, true) => WorkerStatus::Idle,
            (0, false) => WorkerStatus::Error,
            _ => WorkerStatus::Working,
        };
        state.last_activity = Some(Utc::now());
    }

    /// `agent` reported a failure on the error side-channel.
    pub async fn record_error(&self, agent: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState::new(agent));
        state.metrics.error_notifications += 1;
    }

    /// Get a snapshot of all agent states, sorted by name.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, agent: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.dispatched += state.metrics.dispatched;
            total.succeeded += state.metrics.succeeded;
            total.failed += state.metrics.failed;
            total.error_notifications += state.metrics.error_notifications;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
