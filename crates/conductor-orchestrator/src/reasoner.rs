use async_trait::async_trait;
use conductor_core::{ConductorResult, ExecutionMode, SessionContext};
use std::collections::BTreeSet;

/// Reserved answer of [`Reasoner::select_agent`] when nothing fits.
pub const NO_AGENT: &str = "no_agent";

/// Result of decomposing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakdown {
    /// Subtasks in execution order.
    pub subtasks: Vec<String>,
    /// How the subtasks are to be executed.
    pub mode: ExecutionMode,
}

impl Breakdown {
    /// Build a breakdown.
    pub fn new<I, S>(subtasks: I, mode: ExecutionMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subtasks: subtasks.into_iter().map(Into::into).collect(),
            mode,
        }
    }

    /// The degraded decomposition: the whole request as one serial subtask.
    pub fn whole(request: &str) -> Self {
        Self::new([request], ExecutionMode::Serial)
    }
}

/// Narrow interface to the external decision-making capability.
///
/// Implementations must be safe to call concurrently from many sessions.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Choose an agent for `task` from the rendered `descriptions`.
    ///
    /// May return [`NO_AGENT`] or an unknown name; the scheduler falls back
    /// to the generic agent in that case. Names in `excluded` should never be
    /// returned, but callers re-validate.
    async fn select_agent(
        &self,
        descriptions: &str,
        task: &str,
        excluded: &BTreeSet<String>,
    ) -> ConductorResult<String>;

    /// Binary judgement of whether `result` satisfies `original_request`.
    async fn evaluate(&self, original_request: &str, result: &str) -> ConductorResult<bool>;

    /// Break `request` into subtasks and an execution mode.
    ///
    /// Malformed model output must degrade to [`Breakdown::whole`] inside the
    /// implementation rather than surface as an error.
    async fn breakdown(&self, request: &str, context: &SessionContext)
        -> ConductorResult<Breakdown>;
}
