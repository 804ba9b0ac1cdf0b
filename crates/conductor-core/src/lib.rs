//! Core types and error definitions for the Conductor orchestrator.
//!
//! This crate provides the foundational types shared across all Conductor crates:
//! the unified error type, the correlation-scoped message protocol exchanged
//! between the orchestrator, the evaluator and the agents, and the session
//! context record that travels inside those messages.
//!
//! # Main types
//!
//! - [`ConductorError`] - Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] - Convenience alias for `Result<T, ConductorError>`.
//! - [`Envelope`] - A header plus a typed [`Payload`], the unit of transport.
//! - [`MessageHeader`] - Routing and correlation metadata of an envelope.
//! - [`SessionContext`] - The per-request state snapshot carried to agents.
//! - [`Slot`] - Identifies the one result a dispatch is waiting for.

/// Session context records carried inside task payloads.
pub mod context;
/// Error types.
pub mod error;
/// Message protocol: headers, envelopes and payloads.
pub mod message;

pub use context::{ExecutionMode, SessionContext, Subtask};
pub use error::{ConductorError, ConductorResult};
pub use message::{
    Envelope, MessageHeader, MessageType, OutcomeStatus, Payload, Slot,
};

/// Name of the catch-all agent used whenever selection misses.
pub const GENERIC_AGENT: &str = "GenericAgent";

/// Reserved destination of the session state machine.
pub const ORCHESTRATOR: &str = "Orchestrator";

/// Reserved destination of the evaluator.
pub const EVALUATOR: &str = "Evaluator";

/// Names that agents may never register under.
pub const RESERVED_DESTINATIONS: [&str; 2] = [ORCHESTRATOR, EVALUATOR];

/// Returns `true` if `name` is a reserved session-scoped destination.
pub fn is_reserved_destination(name: &str) -> bool {
    RESERVED_DESTINATIONS.contains(&name)
}
