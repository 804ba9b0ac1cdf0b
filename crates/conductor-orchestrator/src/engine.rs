use crate::bus::MessageBus;
use crate::config::OrchestratorConfig;
use crate::delegation::{bounded, Delegation, Delegator};
use crate::monitor::AgentMonitor;
use crate::pending::{PendingTable, Resolution, SlotKey};
use crate::reasoner::{Breakdown, Reasoner};
use crate::registry::AgentRegistry;
use crate::session::{Session, SessionReport, SessionState};
use crate::worker::AgentOutput;
use conductor_core::{
    ConductorError, ConductorResult, Envelope, ExecutionMode, OutcomeStatus, Payload,
    SessionContext, Slot, EVALUATOR, ORCHESTRATOR,
};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The evaluator's verdict as seen by a waiting session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// The aggregate satisfies the request.
    pub completed: bool,
    /// Result to report when `completed` is set.
    pub final_result: Option<String>,
    /// Context as the evaluator returned it.
    pub context: SessionContext,
}

struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
}

/// Outcome of one decomposition pass.
struct Pass {
    aggregate: String,
    succeeded: bool,
}

/// Correlation-scoped session manager.
///
/// Each session runs on its own task and owns its context exclusively. The
/// router task started by [`Orchestrator::start`] feeds agent results and
/// verdicts arriving on the orchestrator topic into the waiting sessions and
/// starts a session for every inbound user request.
pub struct Orchestrator {
    config: OrchestratorConfig,
    reasoner: Arc<dyn Reasoner>,
    bus: Arc<MessageBus>,
    monitor: Arc<AgentMonitor>,
    results: Arc<PendingTable<AgentOutput>>,
    verdicts: PendingTable<Verdict>,
    delegator: Delegator,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        reasoner: Arc<dyn Reasoner>,
        bus: Arc<MessageBus>,
        monitor: Arc<AgentMonitor>,
    ) -> Self {
        let results = Arc::new(PendingTable::new());
        let delegator = Delegator::new(
            registry,
            Arc::clone(&reasoner),
            Arc::clone(&bus),
            Arc::clone(&results),
            Arc::clone(&monitor),
            config.delegation_timeout(),
        );
        Self {
            config,
            reasoner,
            bus,
            monitor,
            results,
            verdicts: PendingTable::new(),
            delegator,
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Spawn the router task listening on the orchestrator topic.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let mut inbox = self.bus.subscribe(ORCHESTRATOR);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("Orchestrator router started");
            loop {
                let envelope = tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    next = inbox.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                this.route(envelope).await;
            }
            this.bus.unsubscribe(inbox.topic(), inbox.id());
            info!("Orchestrator router stopped");
        })
    }

    /// Dispatch one message arriving on the orchestrator topic.
    pub async fn route(self: &Arc<Self>, envelope: Envelope) {
        let correlation_id = envelope.header.correlation_id;
        let sender = envelope.header.sender;
        match envelope.payload {
            Payload::UserRequest { content } => {
                let correlation_id = correlation_id.unwrap_or(envelope.header.message_id);
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = this
                        .run_session(correlation_id, content, Some(sender.clone()))
                        .await
                    {
                        warn!(correlation_id = %correlation_id, error = %e, "User request rejected");
                        let outcome = Envelope::session_outcome(
                            &sender,
                            correlation_id,
                            OutcomeStatus::Rejected,
                            e.to_string(),
                            0,
                        );
                        if let Err(e) = this.bus.publish(&sender, outcome) {
                            error!(correlation_id = %correlation_id, requester = %sender, error = %e, "Could not deliver rejection");
                        }
                    }
                });
            }
            Payload::AgentResult {
                result,
                success,
                slot,
                ..
            } => {
                let Some(correlation_id) = correlation_id else {
                    warn!(agent = %sender, "Discarding result without correlation id");
                    return;
                };
                let output = AgentOutput {
                    result,
                    succeeded: success,
                };
                let resolution = self
                    .results
                    .resolve(SlotKey::new(correlation_id, slot), output);
                log_resolution(resolution, correlation_id, &sender, slot);
            }
            Payload::EvaluationResult {
                completed,
                final_result,
                context,
                slot,
            } => {
                let Some(correlation_id) = correlation_id else {
                    warn!("Discarding verdict without correlation id");
                    return;
                };
                let verdict = Verdict {
                    completed,
                    final_result,
                    context,
                };
                let resolution = self
                    .verdicts
                    .resolve(SlotKey::new(correlation_id, slot), verdict);
                log_resolution(resolution, correlation_id, &sender, slot);
            }
            Payload::ErrorNotification { error } => {
                warn!(agent = %sender, correlation_id = ?correlation_id, error = %error, "Agent reported an error");
                self.monitor.record_error(&sender).await;
            }
            other => {
                debug!(message_type = %other.message_type(), "Ignoring message on orchestrator topic");
            }
        }
    }

    /// Run a session for `request` under a fresh correlation id.
    pub async fn run(&self, request: &str) -> ConductorResult<SessionReport> {
        self.run_session(Uuid::new_v4(), request.to_string(), None)
            .await
    }

    /// Run one session to termination.
    ///
    /// When `requester` is set the terminal outcome is also published to that
    /// topic. Fails only if a session with the same correlation id is already
    /// running.
    pub async fn run_session(
        &self,
        correlation_id: Uuid,
        request: String,
        requester: Option<String>,
    ) -> ConductorResult<SessionReport> {
        let cancel = self.shutdown.child_token();
        let observed = Arc::new(RwLock::new(SessionState::Decomposing));
        {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&correlation_id) {
                return Err(ConductorError::Session(format!(
                    "session {correlation_id} is already running"
                )));
            }
            sessions.insert(
                correlation_id,
                SessionHandle {
                    state: Arc::clone(&observed),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(correlation_id = %correlation_id, request = %request, "Session started");
        let mut session = Session::new(correlation_id, request, observed);
        let (status, result) = match self.drive(&mut session, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                info!(correlation_id = %correlation_id, reason = %e, "Session cancelled");
                (OutcomeStatus::Cancelled, e.to_string())
            }
        };

        let report = session.finish(status, result);
        self.sessions.lock().remove(&correlation_id);
        self.results.forget_session(correlation_id);
        self.verdicts.forget_session(correlation_id);
        info!(
            correlation_id = %correlation_id,
            status = ?report.status,
            attempts = report.attempts,
            "Session terminated"
        );

        if let Some(requester) = requester {
            let outcome = Envelope::session_outcome(
                &requester,
                correlation_id,
                report.status,
                report.result.clone(),
                report.attempts,
            );
            if let Err(e) = self.bus.publish(&requester, outcome) {
                error!(correlation_id = %correlation_id, requester = %requester, error = %e, "Could not deliver session outcome");
            }
        }
        Ok(report)
    }

    /// Abort a running session. Returns `false` if it is not running.
    pub fn cancel(&self, correlation_id: Uuid) -> bool {
        match self.sessions.lock().get(&correlation_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Current state of a running session.
    pub fn session_state(&self, correlation_id: Uuid) -> Option<SessionState> {
        self.sessions
            .lock()
            .get(&correlation_id)
            .map(|h| *h.state.read())
    }

    /// Correlation ids of all running sessions.
    pub fn active_sessions(&self) -> Vec<Uuid> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Stop the router and cancel every running session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The decomposition, delegation, evaluation loop. Errors only on cancellation.
    async fn drive(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> ConductorResult<(OutcomeStatus, String)> {
        let budget = self.config.attempt_budget();
        loop {
            let breakdown = self.decompose(session, cancel).await?;
            session.transition(SessionState::Delegating);
            let pass = match breakdown.mode {
                ExecutionMode::Serial => {
                    self.delegate_serial(session, &breakdown.subtasks, cancel)
                        .await?
                }
                ExecutionMode::Parallel => {
                    self.delegate_parallel(session, &breakdown.subtasks, cancel)
                        .await?
                }
            };

            session.transition(SessionState::Aggregating);
            session.context.final_result = Some(pass.aggregate.clone());

            session.transition(SessionState::Evaluating);
            let verdict = self.evaluate(session, &pass, cancel).await?;
            if verdict.completed {
                let result = verdict
                    .final_result
                    .unwrap_or_else(|| session.context.joined_results());
                return Ok((OutcomeStatus::Completed, result));
            }

            if session.iteration >= budget {
                warn!(
                    correlation_id = %session.correlation_id,
                    attempts = session.iteration,
                    "Retry budget exhausted"
                );
                return Ok((
                    OutcomeStatus::Exhausted,
                    format!(
                        "Request not completed after {} attempt(s). Last result: {}",
                        session.iteration, pass.aggregate
                    ),
                ));
            }

            session.transition(SessionState::Retrying);
            let backoff = self.config.retry_backoff();
            if !backoff.is_zero() {
                cancellable(cancel, tokio::time::sleep(backoff)).await?;
            }
            session.iteration += 1;
            session.transition(SessionState::Decomposing);
        }
    }

    async fn decompose(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> ConductorResult<Breakdown> {
        let request = session.context.original_request.clone();
        let answer = cancellable(cancel, self.reasoner.breakdown(&request, &session.context)).await?;
        let mut breakdown = match answer {
            Ok(breakdown) => breakdown,
            Err(e) => {
                warn!(correlation_id = %session.correlation_id, error = %e, "Breakdown failed, delegating the whole request");
                Breakdown::whole(&request)
            }
        };
        breakdown.subtasks.retain(|t| !t.trim().is_empty());
        if breakdown.subtasks.is_empty() {
            breakdown = Breakdown::new([request], breakdown.mode);
        }
        info!(
            correlation_id = %session.correlation_id,
            iteration = session.iteration,
            subtasks = breakdown.subtasks.len(),
            mode = %breakdown.mode,
            "Request decomposed"
        );
        Ok(breakdown)
    }

    /// One subtask at a time; each sees the previous result in its context.
    async fn delegate_serial(
        &self,
        session: &mut Session,
        subtasks: &[String],
        cancel: &CancellationToken,
    ) -> ConductorResult<Pass> {
        let carried = session.context.tried_agents.clone();
        let range = session.context.push_subtasks(subtasks.iter().cloned());
        let mut last: Option<Delegation> = None;
        for (index, task) in range.zip(subtasks) {
            let excluded = carried.get(task).cloned().unwrap_or_default();
            let agent = cancellable(cancel, self.delegator.resolve_agent(task, &excluded)).await?;
            session.context.record_tried(task, &agent.name);

            let slot = Slot::Subtask {
                iteration: session.iteration,
                index,
            };
            let in_flight = cancellable(
                cancel,
                self.delegator.dispatch(
                    session.correlation_id,
                    slot,
                    &agent,
                    task,
                    session.context.clone(),
                    session.retry(),
                ),
            )
            .await?;
            let delegation = self.delegator.collect(in_flight, cancel).await?;
            session
                .context
                .record_result(index, delegation.output.result.clone());
            last = Some(delegation);
        }

        Ok(match last {
            Some(d) => Pass {
                aggregate: d.output.result,
                succeeded: d.output.succeeded,
            },
            None => Pass {
                aggregate: String::new(),
                succeeded: false,
            },
        })
    }

    /// Dispatch all subtasks in order, then join on every result.
    ///
    /// Results are folded into the context in arrival order once all of them
    /// are in.
    async fn delegate_parallel(
        &self,
        session: &mut Session,
        subtasks: &[String],
        cancel: &CancellationToken,
    ) -> ConductorResult<Pass> {
        let carried = session.context.tried_agents.clone();
        let range = session.context.push_subtasks(subtasks.iter().cloned());
        let mut in_flight = Vec::with_capacity(subtasks.len());
        for (index, task) in range.zip(subtasks) {
            let excluded = carried.get(task).cloned().unwrap_or_default();
            let agent = cancellable(cancel, self.delegator.resolve_agent(task, &excluded)).await?;
            session.context.record_tried(task, &agent.name);

            let slot = Slot::Subtask {
                iteration: session.iteration,
                index,
            };
            let dispatched = cancellable(
                cancel,
                self.delegator.dispatch(
                    session.correlation_id,
                    slot,
                    &agent,
                    task,
                    session.context.clone(),
                    session.retry(),
                ),
            )
            .await?;
            in_flight.push((index, dispatched));
        }

        let collected = join_all(in_flight.into_iter().map(|(index, f)| async move {
            self.delegator.collect(f, cancel).await.map(|d| (index, d))
        }))
        .await;
        let mut arrived = collected.into_iter().collect::<ConductorResult<Vec<_>>>()?;
        arrived.sort_by_key(|(_, d)| d.seq);

        let mut results = Vec::with_capacity(arrived.len());
        let mut succeeded = true;
        for (index, delegation) in arrived {
            session
                .context
                .record_result(index, delegation.output.result.clone());
            succeeded &= delegation.output.succeeded;
            results.push(delegation.output.result);
        }
        Ok(Pass {
            aggregate: results.join("\n"),
            succeeded,
        })
    }

    /// Round trip to the evaluator. Timeouts and transport errors count as
    /// "not completed".
    async fn evaluate(
        &self,
        session: &Session,
        pass: &Pass,
        cancel: &CancellationToken,
    ) -> ConductorResult<Verdict> {
        let key = SlotKey::new(
            session.correlation_id,
            Slot::Evaluation {
                iteration: session.iteration,
            },
        );
        let incomplete = || Verdict {
            completed: false,
            final_result: None,
            context: session.context.clone(),
        };

        let pending = cancellable(cancel, self.verdicts.open(key)).await?;
        let request = Envelope::evaluation_request(
            session.correlation_id,
            pass.aggregate.clone(),
            pass.succeeded,
            session.context.clone(),
            session.iteration,
        );
        if let Err(e) = self.bus.publish(EVALUATOR, request) {
            self.verdicts.abandon(&key);
            warn!(correlation_id = %session.correlation_id, error = %e, "Evaluator unreachable");
            return Ok(incomplete());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.verdicts.abandon(&key);
                Err(ConductorError::Cancelled(format!("evaluation {}", key.slot)))
            }
            waited = bounded(self.config.evaluation_timeout(), pending.wait()) => match waited {
                Some(Some(arrival)) => Ok(arrival.value),
                Some(None) => Err(ConductorError::Cancelled(format!("evaluation {} was abandoned", key.slot))),
                None => {
                    self.verdicts.abandon(&key);
                    warn!(correlation_id = %session.correlation_id, iteration = session.iteration, "Evaluation timed out");
                    Ok(incomplete())
                }
            },
        }
    }
}

/// Race `fut` against cancellation of the session.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> ConductorResult<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ConductorError::Cancelled("session cancelled".into())),
        out = fut => Ok(out),
    }
}

fn log_resolution(resolution: Resolution, correlation_id: Uuid, sender: &str, slot: Slot) {
    match resolution {
        Resolution::Delivered => {
            debug!(correlation_id = %correlation_id, sender = %sender, slot = %slot, "Delivered");
        }
        Resolution::Duplicate => {
            warn!(correlation_id = %correlation_id, sender = %sender, slot = %slot, "Discarding duplicate or late message");
        }
        Resolution::Unknown => {
            warn!(correlation_id = %correlation_id, sender = %sender, slot = %slot, "Discarding message for unknown slot");
        }
    }
}
