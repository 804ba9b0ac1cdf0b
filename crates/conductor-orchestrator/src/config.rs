use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Decomposition passes allowed per session before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on waiting for one agent result. `0` waits forever.
    #[serde(default = "default_timeout_secs")]
    pub delegation_timeout_secs: u64,
    /// Upper bound on waiting for the evaluator. `0` waits forever.
    #[serde(default = "default_timeout_secs")]
    pub evaluation_timeout_secs: u64,
    /// Pause before a retry pass.
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delegation_timeout_secs: default_timeout_secs(),
            evaluation_timeout_secs: default_timeout_secs(),
            retry_backoff_ms: 0,
        }
    }
}

impl OrchestratorConfig {
    /// Attempt budget, never below one pass.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delegation wait bound as a [`Duration`].
    pub fn delegation_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.delegation_timeout_secs)
    }

    /// Evaluation wait bound as a [`Duration`].
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.evaluation_timeout_secs)
    }

    /// Backoff before a retry pass.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
