use crate::bus::MessageBus;
use async_trait::async_trait;
use conductor_core::{ConductorResult, Envelope, Payload, SessionContext, ORCHESTRATOR};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What an agent hands back for one subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    /// Result text. Must describe the failure when `succeeded` is false.
    pub result: String,
    /// Explicit success flag.
    pub succeeded: bool,
}

impl AgentOutput {
    /// A successful result.
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            succeeded: true,
        }
    }

    /// A failure-flagged result.
    pub fn failure(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            succeeded: false,
        }
    }
}

/// The unit that actually performs a subtask.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `task` against a read-only snapshot of the session.
    async fn execute(
        &self,
        task: &str,
        context: &SessionContext,
        retry: u32,
    ) -> ConductorResult<AgentOutput>;
}

/// Binds an [`AgentExecutor`] to a bus topic.
///
/// Every task received produces exactly one result on the orchestrator topic,
/// even when the executor fails.
pub struct AgentWorker {
    name: String,
    executor: Arc<dyn AgentExecutor>,
    bus: Arc<MessageBus>,
}

impl AgentWorker {
    pub fn new(
        name: impl Into<String>,
        executor: Arc<dyn AgentExecutor>,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute one task envelope and build the reply.
    ///
    /// On executor failure an error notification is published first and the
    /// reply carries a failure-flagged `Execution error: ...` result.
    pub async fn handle_task(&self, envelope: Envelope) -> Option<Envelope> {
        let Payload::AgentTask {
            task,
            context,
            retry,
            slot,
        } = envelope.payload
        else {
            debug!(agent = %self.name, message_type = %envelope.header.message_type, "Ignoring non-task message");
            return None;
        };
        let Some(correlation_id) = envelope.header.correlation_id else {
            warn!(agent = %self.name, "Dropping task without correlation id");
            return None;
        };

        info!(agent = %self.name, correlation_id = %correlation_id, slot = %slot, "Received task");
        let output = match self.executor.execute(&task, &context, retry).await {
            Ok(output) => output,
            Err(e) => {
                let notice =
                    Envelope::error_notification(&self.name, e.to_string(), Some(correlation_id));
                if let Err(publish_err) = self.bus.publish(ORCHESTRATOR, notice) {
                    warn!(agent = %self.name, error = %publish_err, "Could not publish error notification");
                }
                AgentOutput::failure(format!("Execution error: {e}"))
            }
        };

        info!(
            agent = %self.name,
            correlation_id = %correlation_id,
            slot = %slot,
            succeeded = output.succeeded,
            "Task processed"
        );
        Some(Envelope::agent_result(
            &self.name,
            correlation_id,
            output.result,
            output.succeeded,
            context,
            slot,
        ))
    }

    /// Subscribe to `topic` and serve tasks until `cancel` fires.
    ///
    /// Each task runs on its own tokio task so one agent can serve several
    /// sessions at once.
    pub fn spawn(self: Arc<Self>, topic: &str, cancel: CancellationToken) -> JoinHandle<()> {
        let mut subscription = self.bus.subscribe(topic);
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let worker = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Some(reply) = worker.handle_task(envelope).await {
                        if let Err(e) = worker.bus.publish(ORCHESTRATOR, reply) {
                            warn!(agent = %worker.name, error = %e, "Could not publish result");
                        }
                    }
                });
            }
            self.bus.unsubscribe(subscription.topic(), subscription.id());
            debug!(agent = %self.name, "Worker stopped");
        })
    }
}
