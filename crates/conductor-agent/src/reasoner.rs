use crate::backends::LlmBackend;
use async_trait::async_trait;
use conductor_core::{ConductorResult, ExecutionMode, SessionContext};
use conductor_orchestrator::{Breakdown, Reasoner};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// [`Reasoner`] that asks a language model for every decision.
///
/// Selection answers are trimmed and handed back verbatim; the scheduler
/// validates them. Verdicts are `true` only for an exact (case-insensitive)
/// `true` answer. Breakdown output that does not follow the
/// `task1; task2 | mode` shape degrades to the whole request.
pub struct LlmReasoner {
    backend: Arc<dyn LlmBackend>,
}

impl LlmReasoner {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

fn selection_prompt(descriptions: &str, task: &str, excluded: &BTreeSet<String>) -> String {
    let excluded = if excluded.is_empty() {
        "none".to_string()
    } else {
        excluded.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "Analyze the question: '{task}' and the following agent descriptions: {descriptions}.\n\
         Exclude: {excluded}.\n\
         Return only the agent name, return no_agent if none selected"
    )
}

fn evaluation_prompt(original_request: &str, result: &str) -> String {
    format!(
        "Given the original request: '{original_request}' and the agent result: '{result}',\n\
         determine if the task was successfully completed. Return True if successful, else False."
    )
}

fn breakdown_prompt(request: &str, context: &str) -> String {
    format!(
        "Break down the task: '{request}' with context: {context}.\n\
         Return subtasks separated by semicolons and execution mode serial or parallel \
         separated by a pipe symbol.\n\
         Example: task1; task2 | serial"
    )
}

/// Parse a `task1; task2 | mode` answer.
///
/// Falls back to [`Breakdown::whole`] when the pipe is missing, the mode is
/// neither `serial` nor `parallel`, or no subtask survives trimming.
pub fn parse_breakdown(response: &str, request: &str) -> Breakdown {
    try_parse_breakdown(response).unwrap_or_else(|| Breakdown::whole(request))
}

fn try_parse_breakdown(response: &str) -> Option<Breakdown> {
    let (tasks, mode) = response.split_once('|')?;
    let mode = mode.parse::<ExecutionMode>().ok()?;
    let subtasks: Vec<&str> = tasks
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if subtasks.is_empty() {
        return None;
    }
    Some(Breakdown::new(subtasks, mode))
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn select_agent(
        &self,
        descriptions: &str,
        task: &str,
        excluded: &BTreeSet<String>,
    ) -> ConductorResult<String> {
        let answer = self
            .backend
            .complete(None, &selection_prompt(descriptions, task, excluded))
            .await?;
        let name = answer.trim().to_string();
        debug!(task, agent = %name, "Model selected agent");
        Ok(name)
    }

    async fn evaluate(&self, original_request: &str, result: &str) -> ConductorResult<bool> {
        let answer = self
            .backend
            .complete(None, &evaluation_prompt(original_request, result))
            .await?;
        Ok(answer.trim().eq_ignore_ascii_case("true"))
    }

    async fn breakdown(
        &self,
        request: &str,
        context: &SessionContext,
    ) -> ConductorResult<Breakdown> {
        let context = serde_json::to_string(context)?;
        let answer = self
            .backend
            .complete(None, &breakdown_prompt(request, &context))
            .await?;
        Ok(try_parse_breakdown(&answer).unwrap_or_else(|| {
            warn!(answer = %answer.trim(), "Malformed breakdown, delegating whole request");
            Breakdown::whole(request)
        }))
    }
}
