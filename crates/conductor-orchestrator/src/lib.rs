//! Correlation-scoped orchestration engine.
//!
//! A user request becomes a session that is decomposed into subtasks, each
//! subtask is routed to the best-matching agent over an in-process message bus,
//! the results are aggregated and judged by the evaluator, and the verdict
//! either terminates the session or starts another decomposition pass under
//! the same correlation id, up to a bounded attempt budget.
//!
//! # Main types
//!
//! - [`Conductor`] - Wires bus, registry, orchestrator, evaluator and workers together.
//! - [`Orchestrator`] - Per-correlation-id session state machine and message router.
//! - [`Delegator`] - Agent resolution with fallback, dispatch and result collection.
//! - [`AgentRegistry`] - Snapshot-swapped set of known agents.
//! - [`Reasoner`] - Interface to the external select/evaluate/breakdown capability.
//! - [`AgentExecutor`] - Interface of the units that perform subtasks.
//! - [`PendingTable`] - Correlation-keyed wait primitive for in-flight requests.

/// Topic-addressed in-process publish/subscribe transport.
pub mod bus;
/// Orchestrator tunables.
pub mod config;
/// Delegation scheduler.
pub mod delegation;
/// Session driver and message router.
pub mod engine;
/// Completion judge.
pub mod evaluator;
/// Per-agent delegation metrics.
pub mod monitor;
/// Resolution slots for in-flight delegations.
pub mod pending;
/// Reasoner interface.
pub mod reasoner;
/// Agent registry.
pub mod registry;
/// Runtime wiring.
pub mod runtime;
/// Session lifecycle states and reports.
pub mod session;
/// Agent executor harness.
pub mod worker;

pub use bus::{MessageBus, Subscription};
pub use config::OrchestratorConfig;
pub use delegation::{Delegation, Delegator, InFlight};
pub use engine::{Orchestrator, Verdict};
pub use evaluator::Evaluator;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use pending::{Arrival, PendingSlot, PendingTable, Resolution, SlotKey};
pub use reasoner::{Breakdown, Reasoner, NO_AGENT};
pub use registry::{AgentEntry, AgentRegistry, RegistrySnapshot};
pub use runtime::{Conductor, GENERIC_AGENT_DESCRIPTION};
pub use session::{SessionReport, SessionState};
pub use worker::{AgentExecutor, AgentOutput, AgentWorker};
