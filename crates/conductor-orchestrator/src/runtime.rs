use crate::bus::MessageBus;
use crate::config::OrchestratorConfig;
use crate::engine::Orchestrator;
use crate::evaluator::Evaluator;
use crate::monitor::AgentMonitor;
use crate::reasoner::Reasoner;
use crate::registry::AgentRegistry;
use crate::session::SessionReport;
use crate::worker::{AgentExecutor, AgentWorker};
use conductor_core::{ConductorResult, Envelope, GENERIC_AGENT, ORCHESTRATOR};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Description the fallback agent is registered with.
pub const GENERIC_AGENT_DESCRIPTION: &str = "Generic agent for common tasks";

struct WorkerSlot {
    topic: String,
    executor: Arc<dyn AgentExecutor>,
    cancel: Option<CancellationToken>,
}

/// Owns the whole system: bus, registry, orchestrator, evaluator and the
/// agent workers.
///
/// The fallback agent is registered at construction and cannot be removed.
pub struct Conductor {
    bus: Arc<MessageBus>,
    registry: Arc<AgentRegistry>,
    monitor: Arc<AgentMonitor>,
    orchestrator: Arc<Orchestrator>,
    evaluator: Arc<Evaluator>,
    workers: Mutex<HashMap<String, WorkerSlot>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Conductor {
    pub fn new(
        config: OrchestratorConfig,
        reasoner: Arc<dyn Reasoner>,
        generic_agent: Arc<dyn AgentExecutor>,
    ) -> Self {
        let bus = Arc::new(MessageBus::new());
        let registry = Arc::new(AgentRegistry::new());
        let monitor = Arc::new(AgentMonitor::new());
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&reasoner),
            Arc::clone(&bus),
            Arc::clone(&monitor),
        ));
        let conductor = Self {
            bus,
            registry,
            monitor,
            orchestrator,
            evaluator: Arc::new(Evaluator::new(reasoner)),
            workers: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };
        conductor.register_agent(
            GENERIC_AGENT,
            GENERIC_AGENT_DESCRIPTION,
            None,
            generic_agent,
        );
        conductor
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Register an agent and bind its executor to `topic` (the agent name by
    /// default). Re-registering a name replaces the previous executor.
    ///
    /// Returns `false` for reserved names. Once the runtime is started the
    /// worker is spawned immediately, so this must then run inside a tokio
    /// runtime.
    pub fn register_agent(
        &self,
        name: &str,
        description: &str,
        topic: Option<&str>,
        executor: Arc<dyn AgentExecutor>,
    ) -> bool {
        let topic = topic.unwrap_or(name).to_string();
        if !self.registry.register(name, description, topic.as_str()) {
            return false;
        }

        let mut workers = self.workers.lock();
        if let Some(previous) = workers.remove(name) {
            if let Some(cancel) = previous.cancel {
                cancel.cancel();
            }
        }
        let mut slot = WorkerSlot {
            topic,
            executor,
            cancel: None,
        };
        if self.started.load(Ordering::SeqCst) {
            self.spawn_worker(name, &mut slot);
        }
        workers.insert(name.to_string(), slot);
        true
    }

    /// Unregister an agent and stop its worker.
    pub fn remove_agent(&self, name: &str) -> bool {
        if !self.registry.unregister(name) {
            return false;
        }
        if let Some(slot) = self.workers.lock().remove(name) {
            if let Some(cancel) = slot.cancel {
                cancel.cancel();
            }
        }
        true
    }

    /// Spawn the router, the evaluator and every registered worker.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let router = self.orchestrator.start();
        let evaluator =
            Arc::clone(&self.evaluator).spawn(Arc::clone(&self.bus), self.cancel.child_token());
        self.handles.lock().extend([router, evaluator]);

        let mut workers = self.workers.lock();
        for (name, slot) in workers.iter_mut() {
            self.spawn_worker(name, slot);
        }
        info!(agents = workers.len(), "Conductor started");
    }

    /// Run a request to termination and return its report.
    pub async fn submit(&self, request: &str) -> ConductorResult<SessionReport> {
        self.start();
        self.orchestrator.run(request).await
    }

    /// Publish a user request on the bus. The outcome arrives on
    /// `requester`'s topic under the returned correlation id.
    pub fn send(&self, requester: &str, request: &str) -> ConductorResult<Uuid> {
        self.start();
        let envelope = Envelope::user_request(requester, request, None);
        let correlation_id = envelope.header.message_id;
        self.bus.publish(ORCHESTRATOR, envelope)?;
        Ok(correlation_id)
    }

    /// Cancel every session and stop all background tasks.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown();
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Conductor stopped");
    }

    fn spawn_worker(&self, name: &str, slot: &mut WorkerSlot) {
        let cancel = self.cancel.child_token();
        let worker = Arc::new(AgentWorker::new(
            name,
            Arc::clone(&slot.executor),
            Arc::clone(&self.bus),
        ));
        let handle = worker.spawn(&slot.topic, cancel.clone());
        self.handles.lock().push(handle);
        slot.cancel = Some(cancel);
    }
}
