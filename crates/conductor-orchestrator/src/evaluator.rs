use crate::bus::MessageBus;
use crate::reasoner::Reasoner;
use conductor_core::{ConductorError, ConductorResult, Envelope, Payload, EVALUATOR, ORCHESTRATOR};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Judges whether an aggregated result satisfies the original request.
///
/// Stateless: everything it needs travels in the message it handles.
pub struct Evaluator {
    reasoner: Arc<dyn Reasoner>,
}

impl Evaluator {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    /// Turn an aggregated `AgentResult` into an `EvaluationResult`.
    ///
    /// A reasoner failure counts as "not completed".
    pub async fn handle(&self, envelope: Envelope) -> ConductorResult<Envelope> {
        let correlation_id = envelope.correlation_id().ok_or_else(|| {
            ConductorError::Orchestrator("evaluation request without correlation id".into())
        })?;
        let Payload::AgentResult {
            result,
            context,
            slot,
            ..
        } = envelope.payload
        else {
            return Err(ConductorError::Orchestrator(format!(
                "evaluator cannot handle {} messages",
                envelope.header.message_type
            )));
        };

        let original_request = if context.original_request.is_empty() {
            "No original request"
        } else {
            context.original_request.as_str()
        };
        let completed = match self.reasoner.evaluate(original_request, &result).await {
            Ok(completed) => completed,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Evaluation failed, treating as incomplete");
                false
            }
        };

        info!(correlation_id = %correlation_id, slot = %slot, completed, "Evaluation finished");
        let final_result = completed.then_some(result);
        Ok(Envelope::evaluation_result(
            correlation_id,
            completed,
            final_result,
            context,
            slot,
        ))
    }

    /// Serve the evaluator topic until `cancel` fires.
    pub fn spawn(self: Arc<Self>, bus: Arc<MessageBus>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut subscription = bus.subscribe(EVALUATOR);
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let evaluator = Arc::clone(&self);
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    match evaluator.handle(envelope).await {
                        Ok(verdict) => {
                            if let Err(e) = bus.publish(ORCHESTRATOR, verdict) {
                                warn!(error = %e, "Could not publish evaluation result");
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping evaluation request"),
                    }
                });
            }
            bus.unsubscribe(subscription.topic(), subscription.id());
        })
    }
}
