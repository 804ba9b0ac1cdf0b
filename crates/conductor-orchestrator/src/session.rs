use conductor_core::{OutcomeStatus, SessionContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Waiting on the reasoner for a breakdown.
    Decomposing,
    /// Subtasks are out with agents.
    Delegating,
    /// Folding collected results into the context.
    Aggregating,
    /// Waiting on the evaluator's verdict.
    Evaluating,
    /// Rejected; about to start another pass.
    Retrying,
    /// Finished, whatever the outcome.
    Terminated,
}

impl SessionState {
    /// Whether the session is finished.
    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Cancellation may end a session from any live state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Decomposing, Delegating)
            | (Delegating, Aggregating)
            | (Aggregating, Evaluating)
            | (Evaluating, Retrying)
            | (Retrying, Decomposing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Decomposing => "DECOMPOSING",
            SessionState::Delegating => "DELEGATING",
            SessionState::Aggregating => "AGGREGATING",
            SessionState::Evaluating => "EVALUATING",
            SessionState::Retrying => "RETRYING",
            SessionState::Terminated => "TERMINATED",
        };
        write!(f, "{s}")
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Id shared by every message of the session.
    pub correlation_id: Uuid,
    /// How the session ended.
    pub status: OutcomeStatus,
    /// Final result on completion, otherwise the reason for stopping.
    pub result: String,
    /// Decomposition passes performed.
    pub attempts: u32,
    /// Every state entered, in order, starting with `DECOMPOSING`.
    pub transitions: Vec<SessionState>,
    /// The session context at termination.
    pub context: SessionContext,
}

/// Mutable state of one running session. Owned by exactly one task.
pub(crate) struct Session {
    pub correlation_id: Uuid,
    pub context: SessionContext,
    /// Current decomposition pass, starting at 1.
    pub iteration: u32,
    state: SessionState,
    transitions: Vec<SessionState>,
    observed: Arc<RwLock<SessionState>>,
}

impl Session {
    pub fn new(
        correlation_id: Uuid,
        original_request: impl Into<String>,
        observed: Arc<RwLock<SessionState>>,
    ) -> Self {
        *observed.write() = SessionState::Decomposing;
        Self {
            correlation_id,
            context: SessionContext::new(original_request),
            iteration: 1,
            state: SessionState::Decomposing,
            transitions: vec![SessionState::Decomposing],
            observed,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of earlier passes, as sent to agents.
    pub fn retry(&self) -> u32 {
        self.iteration.saturating_sub(1)
    }

    pub fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                correlation_id = %self.correlation_id,
                from = %self.state,
                to = %next,
                "Illegal session transition ignored"
            );
            return;
        }
        info!(
            correlation_id = %self.correlation_id,
            iteration = self.iteration,
            from = %self.state,
            to = %next,
            "Session transition"
        );
        self.state = next;
        self.transitions.push(next);
        *self.observed.write() = next;
    }

    pub fn finish(mut self, status: OutcomeStatus, result: String) -> SessionReport {
        self.transition(SessionState::Terminated);
        SessionReport {
            correlation_id: self.correlation_id,
            status,
            result,
            attempts: self.iteration,
            transitions: self.transitions,
            context: self.context,
        }
    }
}
