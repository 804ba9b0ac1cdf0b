use crate::bus::MessageBus;
use crate::monitor::AgentMonitor;
use crate::pending::{PendingSlot, PendingTable, SlotKey};
use crate::reasoner::{Reasoner, NO_AGENT};
use crate::registry::{AgentEntry, AgentRegistry, RegistrySnapshot};
use crate::worker::AgentOutput;
use conductor_core::{
    is_reserved_destination, ConductorError, ConductorResult, Envelope, SessionContext, Slot,
    GENERIC_AGENT,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One collected delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    /// Agent the subtask was dispatched to.
    pub agent: String,
    /// What the agent (or the timeout) produced.
    pub output: AgentOutput,
    /// Arrival order across all delegations.
    pub seq: u64,
}

enum Waiting {
    Slot(PendingSlot<AgentOutput>),
    Failed(AgentOutput),
}

/// A dispatched subtask whose result has not been collected yet.
pub struct InFlight {
    agent: String,
    key: SlotKey,
    waiting: Waiting,
    started: Instant,
}

impl InFlight {
    /// Agent the subtask went to.
    pub fn agent(&self) -> &str {
        &self.agent
    }
}

/// Resolves agents for subtasks, dispatches them and collects their results.
pub struct Delegator {
    registry: Arc<AgentRegistry>,
    reasoner: Arc<dyn Reasoner>,
    bus: Arc<MessageBus>,
    results: Arc<PendingTable<AgentOutput>>,
    monitor: Arc<AgentMonitor>,
    timeout: Option<Duration>,
}

impl Delegator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        reasoner: Arc<dyn Reasoner>,
        bus: Arc<MessageBus>,
        results: Arc<PendingTable<AgentOutput>>,
        monitor: Arc<AgentMonitor>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            reasoner,
            bus,
            results,
            monitor,
            timeout,
        }
    }

    /// Pick the agent for `task`, never one in `excluded`.
    ///
    /// Any answer that is not a registered, non-excluded agent (including a
    /// reasoner failure) resolves to the fallback agent.
    pub async fn resolve_agent(&self, task: &str, excluded: &BTreeSet<String>) -> AgentEntry {
        let snapshot = self.registry.snapshot();
        let descriptions = snapshot.describe();
        let selected = match self
            .reasoner
            .select_agent(&descriptions, task, excluded)
            .await
        {
            Ok(name) => name.trim().to_string(),
            Err(e) => {
                warn!(task = %task, error = %e, "Agent selection failed");
                GENERIC_AGENT.to_string()
            }
        };

        let usable = selected != NO_AGENT
            && !is_reserved_destination(&selected)
            && !excluded.contains(&selected);
        match snapshot.get(&selected).filter(|_| usable) {
            Some(entry) => entry.clone(),
            None => {
                if selected != GENERIC_AGENT {
                    info!(task = %task, selected = %selected, "Falling back to the generic agent");
                }
                fallback_entry(&snapshot)
            }
        }
    }

    /// Open the result slot and publish the task to the agent's topic.
    ///
    /// If another delegation still holds the same slot this waits for it to
    /// resolve first. A publish failure is turned into a failure-flagged
    /// result so the caller always gets exactly one answer.
    pub async fn dispatch(
        &self,
        correlation_id: Uuid,
        slot: Slot,
        agent: &AgentEntry,
        task: &str,
        context: SessionContext,
        retry: u32,
    ) -> InFlight {
        let key = SlotKey::new(correlation_id, slot);
        let pending = self.results.open(key).await;
        self.monitor.start_delegation(&agent.name).await;

        let envelope = Envelope::agent_task(&agent.name, correlation_id, task, context, retry, slot);
        let waiting = match self.bus.publish(&agent.topic, envelope) {
            Ok(_) => {
                info!(
                    correlation_id = %correlation_id,
                    agent = %agent.name,
                    slot = %slot,
                    retry,
                    "Dispatched subtask"
                );
                Waiting::Slot(pending)
            }
            Err(e) => {
                self.results.abandon(&key);
                warn!(correlation_id = %correlation_id, agent = %agent.name, error = %e, "Dispatch failed");
                Waiting::Failed(AgentOutput::failure(format!("Dispatch failed: {e}")))
            }
        };

        InFlight {
            agent: agent.name.clone(),
            key,
            waiting,
            started: Instant::now(),
        }
    }

    /// Wait for the single result of a dispatched subtask.
    ///
    /// A timeout resolves to a failure-flagged result and releases the slot.
    /// Cancellation releases the slot and returns [`ConductorError::Cancelled`].
    pub async fn collect(
        &self,
        in_flight: InFlight,
        cancel: &CancellationToken,
    ) -> ConductorResult<Delegation> {
        let InFlight {
            agent,
            key,
            waiting,
            started,
        } = in_flight;

        let collected = match waiting {
            Waiting::Failed(output) => Ok((output, self.results.next_seq())),
            Waiting::Slot(slot) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.results.abandon(&key);
                        Err(ConductorError::Cancelled(format!("delegation {} to {agent}", key.slot)))
                    }
                    waited = bounded(self.timeout, slot.wait()) => match waited {
                        Some(Some(arrival)) => Ok((arrival.value, arrival.seq)),
                        Some(None) => Err(ConductorError::Cancelled(format!(
                            "delegation {} to {agent} was abandoned",
                            key.slot
                        ))),
                        None => {
                            self.results.abandon(&key);
                            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                            warn!(
                                correlation_id = %key.correlation_id,
                                agent = %agent,
                                slot = %key.slot,
                                "Delegation timed out"
                            );
                            Ok((
                                AgentOutput::failure(format!("Delegation timed out after {secs}s")),
                                self.results.next_seq(),
                            ))
                        }
                    },
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match collected {
            Ok((output, seq)) => {
                self.monitor
                    .finish_delegation(&agent, output.succeeded, duration_ms)
                    .await;
                debug!(
                    correlation_id = %key.correlation_id,
                    agent = %agent,
                    slot = %key.slot,
                    succeeded = output.succeeded,
                    seq,
                    "Collected result"
                );
                Ok(Delegation { agent, output, seq })
            }
            Err(e) => {
                self.monitor.finish_delegation(&agent, false, duration_ms).await;
                Err(e)
            }
        }
    }
}

fn fallback_entry(snapshot: &RegistrySnapshot) -> AgentEntry {
    snapshot
        .get(GENERIC_AGENT)
        .cloned()
        .unwrap_or_else(|| AgentEntry {
            name: GENERIC_AGENT.to_string(),
            description: String::new(),
            topic: GENERIC_AGENT.to_string(),
        })
}

pub(crate) async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
