use crate::backends::LlmBackend;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// How hard to push one backend before handing over to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts on a transient failure, per backend.
    pub retries_per_backend: u32,
    /// First backoff delay; doubled after each transient failure.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries_per_backend: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// What to do after a failed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: back off and try the same backend again.
    Retry,
    /// Permanent for this backend: move on.
    NextBackend,
}

/// First error status (4xx or 5xx) found in an error message.
fn status_code(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|tok| tok.len() == 3)
        .filter_map(|tok| tok.parse::<u16>().ok())
        .find(|code| (400..600).contains(code))
}

/// Classify an error from a backend.
///
/// Rate limiting, server errors, timeouts and connection failures are
/// transient. Missing configuration, malformed responses and other client
/// errors are not.
pub fn classify(err: &ConductorError) -> Disposition {
    match err {
        ConductorError::Timeout(_) => Disposition::Retry,
        ConductorError::Http(message) => match status_code(message) {
            Some(429) | Some(500..=599) => Disposition::Retry,
            Some(_) => Disposition::NextBackend,
            None => {
                let lower = message.to_lowercase();
                if lower.contains("timed out") || lower.contains("connect") {
                    Disposition::Retry
                } else {
                    Disposition::NextBackend
                }
            }
        },
        _ => Disposition::NextBackend,
    }
}

/// Chains backends: the primary first, then each fallback in order.
///
/// Every backend gets `retries_per_backend` extra attempts on transient
/// failures. When the whole chain fails the last error is returned.
pub struct FailoverBackend {
    chain: Vec<Box<dyn LlmBackend>>,
    policy: RetryPolicy,
}

impl FailoverBackend {
    pub fn new(
        primary: Box<dyn LlmBackend>,
        fallbacks: Vec<Box<dyn LlmBackend>>,
        policy: RetryPolicy,
    ) -> Self {
        let chain = std::iter::once(primary).chain(fallbacks).collect();
        Self { chain, policy }
    }

    /// Backends in the chain, the primary included.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    async fn try_backend(
        &self,
        position: usize,
        backend: &dyn LlmBackend,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> ConductorResult<String> {
        let mut attempt = 0;
        loop {
            let err = match backend.complete(system_prompt, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            if classify(&err) == Disposition::NextBackend
                || attempt >= self.policy.retries_per_backend
            {
                return Err(err);
            }
            let delay = self.policy.backoff(attempt);
            info!(
                position,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient completion failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmBackend for FailoverBackend {
    async fn complete(&self, system_prompt: Option<&str>, prompt: &str) -> ConductorResult<String> {
        let mut last_err = None;
        for (position, backend) in self.chain.iter().enumerate() {
            match self
                .try_backend(position, backend.as_ref(), system_prompt, prompt)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(position, error = %e, "Backend failed, trying next in chain");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ConductorError::Reasoner("empty backend chain".into())))
    }
}
