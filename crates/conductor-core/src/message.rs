use crate::context::SessionContext;
use crate::{EVALUATOR, ORCHESTRATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of record carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// A request entering the system from a user.
    UserRequest,
    /// A subtask dispatched to an agent.
    AgentTask,
    /// An agent's answer to a task, or an aggregate sent for evaluation.
    AgentResult,
    /// The evaluator's verdict on an aggregate.
    EvaluationResult,
    /// Out-of-band report of an agent failure.
    ErrorNotification,
    /// Terminal message returned to the requester.
    SessionOutcome,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::UserRequest => "UserRequest",
            MessageType::AgentTask => "AgentTask",
            MessageType::AgentResult => "AgentResult",
            MessageType::EvaluationResult => "EvaluationResult",
            MessageType::ErrorNotification => "ErrorNotification",
            MessageType::SessionOutcome => "SessionOutcome",
        };
        f.write_str(name)
    }
}

/// Routing and correlation metadata shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique identifier of this message.
    pub message_id: Uuid,
    /// Name of the component that produced the message.
    pub sender: String,
    /// Intended destination, if the message is addressed.
    pub recipient: Option<String>,
    /// UTC creation time.
    pub timestamp: DateTime<Utc>,
    /// Session the message belongs to. Absent only on a fresh user request.
    pub correlation_id: Option<Uuid>,
    /// Kind of payload.
    pub message_type: MessageType,
}

/// The resolution slot a result is destined for.
///
/// Together with the correlation id this keys a pending delegation. The
/// iteration number keeps a late answer from an earlier pass out of a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Slot {
    /// The result of subtask `index` (position in the session's subtask list).
    Subtask {
        /// Decomposition pass, starting at 1.
        iteration: u32,
        /// Index into [`SessionContext::subtasks`].
        index: usize,
    },
    /// The evaluator's verdict for a pass.
    Evaluation {
        /// Decomposition pass, starting at 1.
        iteration: u32,
    },
}

impl Slot {
    /// Decomposition pass this slot belongs to.
    pub fn iteration(&self) -> u32 {
        match self {
            Slot::Subtask { iteration, .. } | Slot::Evaluation { iteration } => *iteration,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Subtask { iteration, index } => write!(f, "subtask#{index}@{iteration}"),
            Slot::Evaluation { iteration } => write!(f, "evaluation@{iteration}"),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The evaluator judged the aggregate complete.
    Completed,
    /// The retry budget ran out before the evaluator was satisfied.
    Exhausted,
    /// The session was cancelled while in flight.
    Cancelled,
    /// The request never started a session, e.g. its correlation id was
    /// already in use.
    Rejected,
}

/// Typed body of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A user request.
    UserRequest {
        /// The request text.
        content: String,
    },
    /// A subtask for an agent.
    AgentTask {
        /// The subtask text.
        task: String,
        /// Read-only snapshot of the session.
        context: SessionContext,
        /// Number of earlier decomposition passes in this session.
        retry: u32,
        /// Slot the answer must be echoed to.
        slot: Slot,
    },
    /// An agent's answer, or an aggregate headed for the evaluator.
    AgentResult {
        /// The result text. Always present, even on failure.
        result: String,
        /// Explicit success flag set by the executor.
        success: bool,
        /// Session snapshot the result was produced against.
        context: SessionContext,
        /// Slot this result resolves.
        slot: Slot,
    },
    /// The evaluator's binary verdict.
    EvaluationResult {
        /// Whether the aggregate satisfies the original request.
        completed: bool,
        /// The accepted result, present only when completed.
        final_result: Option<String>,
        /// The context the verdict was produced against, unmodified.
        context: SessionContext,
        /// Evaluation slot being resolved.
        slot: Slot,
    },
    /// Side-channel failure report.
    ErrorNotification {
        /// Human-readable error description.
        error: String,
    },
    /// Terminal answer to the requester.
    SessionOutcome {
        /// How the session ended.
        status: OutcomeStatus,
        /// Final result text (or the reason for giving up).
        result: String,
        /// Number of decomposition passes performed.
        attempts: u32,
    },
}

impl Payload {
    /// The [`MessageType`] matching this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::UserRequest { .. } => MessageType::UserRequest,
            Payload::AgentTask { .. } => MessageType::AgentTask,
            Payload::AgentResult { .. } => MessageType::AgentResult,
            Payload::EvaluationResult { .. } => MessageType::EvaluationResult,
            Payload::ErrorNotification { .. } => MessageType::ErrorNotification,
            Payload::SessionOutcome { .. } => MessageType::SessionOutcome,
        }
    }
}

/// A message as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing and correlation metadata.
    pub header: MessageHeader,
    /// The typed record.
    pub payload: Payload,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Envelope {
    /// Build an envelope whose header type always agrees with the payload.
    pub fn new(
        sender: impl Into<String>,
        recipient: Option<String>,
        correlation_id: Option<Uuid>,
        payload: Payload,
    ) -> Self {
        Self {
            header: MessageHeader {
                message_id: Uuid::new_v4(),
                sender: sender.into(),
                recipient,
                timestamp: Utc::now(),
                correlation_id,
                message_type: payload.message_type(),
            },
            payload,
            metadata: HashMap::new(),
        }
    }

    /// A user request addressed to the orchestrator.
    pub fn user_request(
        sender: impl Into<String>,
        content: impl Into<String>,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            sender,
            Some(ORCHESTRATOR.to_string()),
            correlation_id,
            Payload::UserRequest {
                content: content.into(),
            },
        )
    }

    /// A subtask dispatched by the orchestrator to `recipient`.
    pub fn agent_task(
        recipient: impl Into<String>,
        correlation_id: Uuid,
        task: impl Into<String>,
        context: SessionContext,
        retry: u32,
        slot: Slot,
    ) -> Self {
        Self::new(
            ORCHESTRATOR,
            Some(recipient.into()),
            Some(correlation_id),
            Payload::AgentTask {
                task: task.into(),
                context,
                retry,
                slot,
            },
        )
    }

    /// An agent result addressed to the orchestrator.
    pub fn agent_result(
        sender: impl Into<String>,
        correlation_id: Uuid,
        result: impl Into<String>,
        success: bool,
        context: SessionContext,
        slot: Slot,
    ) -> Self {
        Self::new(
            sender,
            Some(ORCHESTRATOR.to_string()),
            Some(correlation_id),
            Payload::AgentResult {
                result: result.into(),
                success,
                context,
                slot,
            },
        )
    }

    /// An aggregated result sent from the orchestrator to the evaluator.
    pub fn evaluation_request(
        correlation_id: Uuid,
        result: impl Into<String>,
        success: bool,
        context: SessionContext,
        iteration: u32,
    ) -> Self {
        Self::new(
            ORCHESTRATOR,
            Some(EVALUATOR.to_string()),
            Some(correlation_id),
            Payload::AgentResult {
                result: result.into(),
                success,
                context,
                slot: Slot::Evaluation { iteration },
            },
        )
    }

    /// The evaluator's verdict, addressed to the orchestrator.
    pub fn evaluation_result(
        correlation_id: Uuid,
        completed: bool,
        final_result: Option<String>,
        context: SessionContext,
        slot: Slot,
    ) -> Self {
        Self::new(
            EVALUATOR,
            Some(ORCHESTRATOR.to_string()),
            Some(correlation_id),
            Payload::EvaluationResult {
                completed,
                final_result,
                context,
                slot,
            },
        )
    }

    /// An error notification addressed to the orchestrator.
    pub fn error_notification(
        sender: impl Into<String>,
        error: impl Into<String>,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            sender,
            Some(ORCHESTRATOR.to_string()),
            correlation_id,
            Payload::ErrorNotification {
                error: error.into(),
            },
        )
    }

    /// The terminal outcome of a session, addressed to the original requester.
    pub fn session_outcome(
        recipient: impl Into<String>,
        correlation_id: Uuid,
        status: OutcomeStatus,
        result: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::new(
            ORCHESTRATOR,
            Some(recipient.into()),
            Some(correlation_id),
            Payload::SessionOutcome {
                status,
                result: result.into(),
                attempts,
            },
        )
    }

    /// The session this envelope belongs to.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.header.correlation_id
    }

    /// The kind of record carried.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }
}
