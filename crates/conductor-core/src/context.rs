use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::str::FromStr;

/// How the subtasks of one decomposition pass are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One at a time, in list order, each seeing the previous result.
    #[default]
    Serial,
    /// All at once; results are joined after every subtask has resolved.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Serial => write!(f, "serial"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(ExecutionMode::Serial),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// One unit of decomposed work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// The task text handed to the resolved agent.
    pub task: String,
    /// Set once a result for this subtask has been received.
    pub completed: bool,
}

impl Subtask {
    /// Create an uncompleted subtask.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            completed: false,
        }
    }
}

/// Mutable state of one orchestration session.
///
/// Owned by the session state machine; agents and the evaluator only ever
/// receive a cloned snapshot inside a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// The request text as first received. Never changes.
    pub original_request: String,
    /// Every subtask of every decomposition pass, in the order they were produced.
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Subtask results in completion order.
    #[serde(default)]
    pub agent_results: Vec<String>,
    /// The most recent individual subtask result.
    #[serde(default)]
    pub previous_result: Option<String>,
    /// Aggregate of the latest decomposition pass.
    #[serde(default)]
    pub final_result: Option<String>,
    /// Agents attempted per subtask text, accumulated across passes.
    ///
    /// A pass only excludes agents recorded by earlier passes, so repeated
    /// subtask text within one pass does not share exclusions.
    #[serde(default)]
    pub tried_agents: BTreeMap<String, BTreeSet<String>>,
}

impl SessionContext {
    /// Create an empty context for a new request.
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            original_request: original_request.into(),
            subtasks: Vec::new(),
            agent_results: Vec::new(),
            previous_result: None,
            final_result: None,
            tried_agents: BTreeMap::new(),
        }
    }

    /// Append the subtasks of a new decomposition pass and return their index range.
    pub fn push_subtasks<I, S>(&mut self, tasks: I) -> Range<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let start = self.subtasks.len();
        self.subtasks.extend(tasks.into_iter().map(Subtask::new));
        start..self.subtasks.len()
    }

    /// Fold one subtask result into the context.
    ///
    /// Returns `false` (and changes nothing) if the index is unknown or the
    /// subtask already has a result.
    pub fn record_result(&mut self, index: usize, result: impl Into<String>) -> bool {
        let Some(subtask) = self.subtasks.get_mut(index) else {
            return false;
        };
        if subtask.completed {
            return false;
        }
        subtask.completed = true;
        let result = result.into();
        self.agent_results.push(result.clone());
        self.previous_result = Some(result);
        true
    }

    /// Agents already tried for the given subtask text.
    pub fn tried_for(&self, task: &str) -> BTreeSet<String> {
        self.tried_agents.get(task).cloned().unwrap_or_default()
    }

    /// Remember that `agent` was dispatched for `task`.
    pub fn record_tried(&mut self, task: &str, agent: impl Into<String>) {
        self.tried_agents
            .entry(task.to_string())
            .or_default()
            .insert(agent.into());
    }

    /// All collected results joined by newlines.
    pub fn joined_results(&self) -> String {
        self.agent_results.join("\n")
    }

    /// Number of subtasks still waiting for a result.
    pub fn pending_count(&self) -> usize {
        self.subtasks.iter().filter(|s| !s.completed).count()
    }
}
