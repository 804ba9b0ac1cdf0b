use crate::backends::LlmBackend;
use async_trait::async_trait;
use conductor_core::{ConductorResult, SessionContext};
use conductor_orchestrator::{AgentExecutor, AgentOutput};
use std::sync::Arc;
use tracing::info;

/// An agent persona backed by a language model.
///
/// `background` becomes the system prompt. The task prompt carries the
/// original request, the previous subtask result (if any) and a note when the
/// task is being retried. A completed call is reported as a success; backend
/// errors propagate so the worker can raise an error notification.
pub struct LlmAgent {
    name: String,
    background: String,
    backend: Arc<dyn LlmBackend>,
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        background: impl Into<String>,
        backend: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            background: background.into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn task_prompt(task: &str, context: &SessionContext, retry: u32) -> String {
        let mut prompt = format!("Overall request: {}\n\n", context.original_request);
        if let Some(previous) = &context.previous_result {
            prompt.push_str(&format!("Result of the previous step:\n{previous}\n\n"));
        }
        if retry > 0 {
            prompt.push_str(&format!(
                "An earlier attempt did not satisfy the request (retry {retry}). Improve on it.\n\n"
            ));
        }
        prompt.push_str(&format!("Your task: {task}"));
        prompt
    }
}

#[async_trait]
impl AgentExecutor for LlmAgent {
    async fn execute(
        &self,
        task: &str,
        context: &SessionContext,
        retry: u32,
    ) -> ConductorResult<AgentOutput> {
        let system = (!self.background.is_empty()).then_some(self.background.as_str());
        let answer = self
            .backend
            .complete(system, &Self::task_prompt(task, context, retry))
            .await?;
        info!(agent = %self.name, chars = answer.len(), "Agent produced result");
        Ok(AgentOutput::success(answer))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::ConductorError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(Option<String>, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmBackend for Recording {
        async fn complete(&self, system: Option<&str>, prompt: &str) -> ConductorResult<String> {
            self.calls
                .lock()
                .push((system.map(str::to_string), prompt.to_string()));
            if self.fail {
                return Err(ConductorError::Http("503 Service Unavailable".into()));
            }
            Ok("fn sort() {}".into())
        }
    }

    #[tokio::test]
    async fn test_background_is_system_prompt() {
        let backend = Arc::new(Recording::default());
        let agent = LlmAgent::new("Dev", "You write code.", backend.clone());
        let out = agent
            .execute("implement sort", &SessionContext::new("sort a list"), 0)
            .await
            .unwrap();

        assert_eq!(out, AgentOutput::success("fn sort() {}"));
        let calls = backend.calls.lock();
        assert_eq!(calls[0].0.as_deref(), Some("You write code."));
        assert!(calls[0].1.ends_with("Your task: implement sort"));
        assert!(!calls[0].1.contains("retry"));
    }

    #[tokio::test]
    async fn test_prompt_carries_previous_result_and_retry() {
        let backend = Arc::new(Recording::default());
        let agent = LlmAgent::new("Test", "", backend.clone());
        let mut context = SessionContext::new("sort a list");
        context.previous_result = Some("fn sort() {}".into());

        agent.execute("write tests", &context, 2).await.unwrap();

        let calls = backend.calls.lock();
        assert_eq!(calls[0].0, None);
        assert!(calls[0].1.contains("Result of the previous step:\nfn sort() {}"));
        assert!(calls[0].1.contains("(retry 2)"));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let agent = LlmAgent::new("Dev", "You write code.", backend);
        assert_eq!(agent.name(), "Dev");
        let err = agent
            .execute("implement sort", &SessionContext::new("sort a list"), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
