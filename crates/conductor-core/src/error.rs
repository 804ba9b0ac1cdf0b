use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor orchestrator.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// An agent executor failed to run a subtask.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The reasoning engine failed to answer a selection, evaluation or breakdown call.
    #[error("Reasoner error: {0}")]
    Reasoner(String),

    /// The message transport could not deliver an envelope.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A session could not be created or driven.
    #[error("Session error: {0}")]
    Session(String),

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An outbound HTTP request failed (e.g. an LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error from the orchestration engine itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation was abandoned because its session was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
