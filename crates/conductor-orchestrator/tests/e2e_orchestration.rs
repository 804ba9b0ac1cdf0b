//! End-to-end orchestration tests.
//!
//! Drives complete sessions through the bus with a scripted reasoner and
//! in-process agents. Checks: serial carry-forward, parallel arrival order,
//! selection fallback, evaluation-driven retries under one correlation id,
//! retry budget, cancellation and delegation timeouts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_core::{
    ConductorError, ConductorResult, Envelope, ExecutionMode, MessageType, OutcomeStatus,
    Payload, SessionContext, GENERIC_AGENT, ORCHESTRATOR,
};
use conductor_orchestrator::*;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scripted reasoner
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    breakdowns: VecDeque<Result<Breakdown, String>>,
    selections: HashMap<String, VecDeque<String>>,
    verdicts: VecDeque<bool>,
}

#[derive(Default)]
struct ScriptedReasoner {
    script: Mutex<Script>,
    breakdown_contexts: Mutex<Vec<SessionContext>>,
    selection_calls: Mutex<Vec<(String, BTreeSet<String>)>>,
}

impl ScriptedReasoner {
    fn breakdown(self, subtasks: &[&str], mode: ExecutionMode) -> Self {
        self.script
            .lock()
            .breakdowns
            .push_back(Ok(Breakdown::new(subtasks.iter().copied(), mode)));
        self
    }

    fn failing_breakdown(self) -> Self {
        self.script
            .lock()
            .breakdowns
            .push_back(Err("model returned garbage".into()));
        self
    }

    fn select(self, task: &str, agent: &str) -> Self {
        self.script
            .lock()
            .selections
            .entry(task.to_string())
            .or_default()
            .push_back(agent.to_string());
        self
    }

    fn verdicts(self, verdicts: &[bool]) -> Self {
        self.script.lock().verdicts.extend(verdicts.iter().copied());
        self
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn select_agent(
        &self,
        _descriptions: &str,
        task: &str,
        excluded: &BTreeSet<String>,
    ) -> ConductorResult<String> {
        self.selection_calls
            .lock()
            .push((task.to_string(), excluded.clone()));
        let mut script = self.script.lock();
        Ok(script
            .selections
            .get_mut(task)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| GENERIC_AGENT.to_string()))
    }

    async fn evaluate(&self, _original_request: &str, _result: &str) -> ConductorResult<bool> {
        Ok(self.script.lock().verdicts.pop_front().unwrap_or(true))
    }

    async fn breakdown(&self, request: &str, context: &SessionContext) -> ConductorResult<Breakdown> {
        self.breakdown_contexts.lock().push(context.clone());
        match self.script.lock().breakdowns.pop_front() {
            Some(Ok(breakdown)) => Ok(breakdown),
            Some(Err(e)) => Err(ConductorError::Reasoner(e)),
            None => Ok(Breakdown::whole(request)),
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// What an agent saw when it was called.
#[derive(Debug, Clone)]
struct Call {
    agent: &'static str,
    task: String,
    previous_result: Option<String>,
    retry: u32,
}

type Journal = Arc<Mutex<Vec<String>>>;

/// Answers with a fixed result, optionally after a delay or a gate.
struct ScriptedAgent {
    name: &'static str,
    output: &'static str,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: Arc<Mutex<Vec<Call>>>,
    journal: Journal,
}

impl ScriptedAgent {
    fn new(name: &'static str, output: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            output,
            delay: None,
            gate: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            journal: Arc::clone(journal),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    async fn execute(
        &self,
        task: &str,
        context: &SessionContext,
        retry: u32,
    ) -> ConductorResult<AgentOutput> {
        self.journal.lock().push(format!("start {task}"));
        self.calls.lock().push(Call {
            agent: self.name,
            task: task.to_string(),
            previous_result: context.previous_result.clone(),
            retry,
        });
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.lock().push(format!("end {task}"));
        Ok(AgentOutput::success(self.output))
    }
}

fn build(
    reasoner: ScriptedReasoner,
    config: OrchestratorConfig,
) -> (Conductor, Arc<ScriptedReasoner>, Journal) {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let reasoner = Arc::new(reasoner);
    let generic = ScriptedAgent::new(GENERIC_AGENT, "generic-result", &journal);
    let conductor = Conductor::new(config, reasoner.clone(), Arc::new(generic));
    (conductor, reasoner, journal)
}

/// Subscribe a raw agent to `topic` that hands every task to `reply`.
fn raw_agent<F>(bus: &Arc<MessageBus>, topic: &str, reply: F)
where
    F: Fn(&Envelope) -> Vec<Envelope> + Send + 'static,
{
    let mut inbox = bus.subscribe(topic);
    let bus = Arc::clone(bus);
    tokio::spawn(async move {
        while let Some(task) = inbox.recv().await {
            for answer in reply(&task) {
                let _ = bus.publish(ORCHESTRATOR, answer);
            }
        }
    });
}

fn reply_to(task: &Envelope, sender: &str, result: &str) -> Envelope {
    let Payload::AgentTask { context, slot, .. } = &task.payload else {
        panic!("expected a task, got {:?}", task.payload);
    };
    Envelope::agent_result(
        sender,
        task.correlation_id().unwrap(),
        result,
        true,
        context.clone(),
        *slot,
    )
}

// ---- 1. Scenario A: serial pipeline ---------------------------------------

#[tokio::test]
async fn test_serial_final_result_is_last_subtask_output() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["implement sort", "test sort"], ExecutionMode::Serial)
        .select("implement sort", "Dev")
        .select("test sort", "Test")
        .verdicts(&[true]);
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());

    let dev = ScriptedAgent::new("Dev", "fn sort() {}", &journal);
    let test = ScriptedAgent::new("Test", "all tests pass", &journal);
    let test_calls = Arc::clone(&test.calls);
    conductor.register_agent("Dev", "Writes code", None, Arc::new(dev));
    conductor.register_agent("Test", "Writes tests", None, Arc::new(test));

    let report = conductor.submit("sort a list").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Completed);
    assert_eq!(report.result, "all tests pass");
    assert_eq!(report.attempts, 1);
    assert_eq!(report.context.agent_results, vec!["fn sort() {}", "all tests pass"]);
    assert!(report.context.subtasks.iter().all(|s| s.completed));

    // The second subtask saw the first one's result.
    let calls = test_calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].previous_result.as_deref(), Some("fn sort() {}"));
    assert_eq!(calls[0].retry, 0);

    conductor.shutdown().await;
}

// ---- 2. Serial ordering ---------------------------------------------------

#[tokio::test]
async fn test_serial_never_dispatches_before_previous_result() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["first", "second", "third"], ExecutionMode::Serial)
        .select("first", "Slow")
        .select("second", "Slow")
        .select("third", "Slow");
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());
    let mut slow = ScriptedAgent::new("Slow", "ok", &journal);
    slow.delay = Some(Duration::from_millis(30));
    conductor.register_agent("Slow", "Takes its time", None, Arc::new(slow));

    conductor.submit("three steps").await.unwrap();
    assert_eq!(
        journal.lock().clone(),
        vec![
            "start first",
            "end first",
            "start second",
            "end second",
            "start third",
            "end third"
        ]
    );
    conductor.shutdown().await;
}

// ---- 3. Scenario B: parallel arrival order --------------------------------

#[tokio::test]
async fn test_parallel_aggregate_follows_arrival_order() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["task1", "task2"], ExecutionMode::Parallel)
        .select("task1", "Dev")
        .select("task2", "Test")
        .verdicts(&[true]);
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());

    // Dev only answers once Test's result has been seen on the orchestrator topic.
    let gate = Arc::new(Notify::new());
    let mut dev = ScriptedAgent::new("Dev", "task1-result", &journal);
    dev.gate = Some(Arc::clone(&gate));
    let test = ScriptedAgent::new("Test", "task2-result", &journal);
    conductor.register_agent("Dev", "Writes code", None, Arc::new(dev));
    conductor.register_agent("Test", "Writes tests", None, Arc::new(test));

    let mut spy = conductor.bus().subscribe(ORCHESTRATOR);
    tokio::spawn(async move {
        while let Some(msg) = spy.recv().await {
            if msg.message_type() == MessageType::AgentResult && msg.header.sender == "Test" {
                gate.notify_one();
                break;
            }
        }
    });

    let report = conductor.submit("two things at once").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Completed);
    assert_eq!(
        report.context.agent_results,
        vec!["task2-result", "task1-result"]
    );
    assert_eq!(report.result, "task2-result\ntask1-result");
    assert_eq!(journal.lock().last().map(String::as_str), Some("end task1"));

    conductor.shutdown().await;
}

// ---- 4. Scenario C: selection miss -----------------------------------------

#[tokio::test]
async fn test_unknown_selection_falls_back_to_generic_agent() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["summon"], ExecutionMode::Serial)
        .select("summon", "Ghost");
    let (conductor, _, _) = build(reasoner, OrchestratorConfig::default());

    let report = conductor.submit("summon a ghost").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Completed);
    assert_eq!(report.result, "generic-result");

    let generic = conductor.monitor().get_state(GENERIC_AGENT).await.unwrap();
    assert_eq!(generic.metrics.dispatched, 1);
    assert!(conductor.monitor().get_state("Ghost").await.is_none());
    conductor.shutdown().await;
}

// ---- 5. Scenario D: retry under the same correlation id -------------------

#[tokio::test]
async fn test_failed_evaluation_retries_under_same_correlation_id() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["implement sort"], ExecutionMode::Serial)
        .breakdown(&["implement sort"], ExecutionMode::Serial)
        .select("implement sort", "Dev")
        .select("implement sort", "Dev")
        .verdicts(&[false, true]);
    let (conductor, reasoner, journal) = build(reasoner, OrchestratorConfig::default());
    let dev = ScriptedAgent::new("Dev", "draft", &journal);
    conductor.register_agent("Dev", "Writes code", None, Arc::new(dev));

    let mut user = conductor.bus().subscribe("User");
    let mut spy = conductor.bus().subscribe(ORCHESTRATOR);
    let correlation_id = conductor.send("User", "sort a list").unwrap();

    let outcome = user.recv().await.unwrap();
    assert_eq!(outcome.correlation_id(), Some(correlation_id));
    match outcome.payload {
        Payload::SessionOutcome {
            status, attempts, ..
        } => {
            assert_eq!(status, OutcomeStatus::Completed);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // Every message of the session carried the same correlation id.
    let mut seen = 0;
    while let Some(msg) = spy.try_recv() {
        // The inbound request carries no correlation id; its message id becomes it.
        let scope = msg.correlation_id().unwrap_or(msg.header.message_id);
        assert_eq!(scope, correlation_id);
        seen += 1;
    }
    assert!(seen >= 5, "expected request, results and verdicts, saw {seen}");

    // The second pass saw the first pass's result.
    let contexts = reasoner.breakdown_contexts.lock().clone();
    assert_eq!(contexts.len(), 2);
    assert!(contexts[0].agent_results.is_empty());
    assert_eq!(contexts[1].agent_results, vec!["draft"]);

    // Dev was excluded on the retry, so the fallback took over.
    let selections = reasoner.selection_calls.lock().clone();
    assert_eq!(selections.len(), 2);
    assert!(selections[0].1.is_empty());
    assert!(selections[1].1.contains("Dev"));
    let generic = conductor.monitor().get_state(GENERIC_AGENT).await.unwrap();
    assert_eq!(generic.metrics.dispatched, 1);

    conductor.shutdown().await;
}

#[tokio::test]
async fn test_retry_counter_reaches_agents() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["a"], ExecutionMode::Serial)
        .breakdown(&["b"], ExecutionMode::Serial)
        .select("a", "Dev")
        .select("b", "Dev")
        .verdicts(&[false, true]);
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());
    let dev = ScriptedAgent::new("Dev", "x", &journal);
    let calls = Arc::clone(&dev.calls);
    conductor.register_agent("Dev", "Writes code", None, Arc::new(dev));

    conductor.submit("r").await.unwrap();
    let calls = calls.lock().clone();
    let retries: Vec<(&str, u32)> = calls.iter().map(|c| (c.task.as_str(), c.retry)).collect();
    assert_eq!(retries, vec![("a", 0), ("b", 1)]);
    assert!(calls.iter().all(|c| c.agent == "Dev"));
    conductor.shutdown().await;
}

#[tokio::test]
async fn test_repeated_subtask_text_keeps_separate_exclusions() {
    for mode in [ExecutionMode::Serial, ExecutionMode::Parallel] {
        let reasoner = ScriptedReasoner::default()
            .breakdown(&["lint", "lint"], mode)
            .select("lint", "Dev")
            .select("lint", "Dev")
            .verdicts(&[true]);
        let (conductor, reasoner, journal) = build(reasoner, OrchestratorConfig::default());
        let dev = ScriptedAgent::new("Dev", "dev-lint", &journal);
        conductor.register_agent("Dev", "Lints code", None, Arc::new(dev));

        let report = conductor.submit("lint the repo").await.unwrap();
        assert_eq!(report.status, OutcomeStatus::Completed);
        assert_eq!(
            report.context.agent_results,
            vec!["dev-lint", "dev-lint"],
            "{mode:?} pass"
        );

        // Neither copy was excluded from Dev on its first attempt.
        let selections = reasoner.selection_calls.lock().clone();
        assert_eq!(selections.len(), 2);
        assert!(selections.iter().all(|(_, excluded)| excluded.is_empty()), "{mode:?} pass");
        assert!(conductor.monitor().get_state(GENERIC_AGENT).await.is_none());
        conductor.shutdown().await;
    }
}

// ---- 6. Retry budget -------------------------------------------------------

#[tokio::test]
async fn test_exhausted_budget_sends_terminal_failure() {
    let config = OrchestratorConfig {
        max_attempts: 3,
        ..OrchestratorConfig::default()
    };
    let reasoner = ScriptedReasoner::default().verdicts(&[false, false, false, false]);
    let (conductor, reasoner, _) = build(reasoner, config);

    let mut user = conductor.bus().subscribe("User");
    let correlation_id = conductor.send("User", "impossible").unwrap();
    let outcome = user.recv().await.unwrap();
    assert_eq!(outcome.correlation_id(), Some(correlation_id));
    match outcome.payload {
        Payload::SessionOutcome {
            status,
            result,
            attempts,
        } => {
            assert_eq!(status, OutcomeStatus::Exhausted);
            assert_eq!(attempts, 3);
            assert!(result.contains("generic-result"));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(reasoner.breakdown_contexts.lock().len(), 3);
    conductor.shutdown().await;
}

// ---- 7. Decomposition failure ----------------------------------------------

#[tokio::test]
async fn test_breakdown_error_delegates_whole_request() {
    let reasoner = ScriptedReasoner::default().failing_breakdown();
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());

    let report = conductor.submit("do the thing").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Completed);
    assert_eq!(report.context.subtasks.len(), 1);
    assert_eq!(report.context.subtasks[0].task, "do the thing");
    assert_eq!(journal.lock()[0], "start do the thing");
    conductor.shutdown().await;
}

// ---- 8. Duplicate results ---------------------------------------------------

#[tokio::test]
async fn test_duplicate_result_is_discarded() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["once"], ExecutionMode::Serial)
        .select("once", "Chatty");
    let (conductor, _, _) = build(reasoner, OrchestratorConfig::default());
    conductor
        .registry()
        .register("Chatty", "Answers twice", "Chatty");
    raw_agent(conductor.bus(), "Chatty", |task| {
        vec![
            reply_to(task, "Chatty", "first"),
            reply_to(task, "Chatty", "second"),
        ]
    });

    let report = conductor.submit("say it once").await.unwrap();
    assert_eq!(report.result, "first");
    assert_eq!(report.context.agent_results, vec!["first"]);
    conductor.shutdown().await;
}

// ---- 9. Cancellation ----------------------------------------------------------

#[tokio::test]
async fn test_cancel_in_flight_session() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["wait forever"], ExecutionMode::Serial)
        .select("wait forever", "Sink");
    let config = OrchestratorConfig {
        delegation_timeout_secs: 0,
        ..OrchestratorConfig::default()
    };
    let (conductor, _, _) = build(reasoner, config);
    conductor.registry().register("Sink", "Never answers", "Sink");
    raw_agent(conductor.bus(), "Sink", |_| Vec::new());
    conductor.start();

    let orchestrator = Arc::clone(conductor.orchestrator());
    let correlation_id = Uuid::new_v4();
    let session = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .run_session(correlation_id, "stall".into(), None)
                .await
        }
    });

    for _ in 0..100 {
        if orchestrator.session_state(correlation_id) == Some(SessionState::Delegating) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        orchestrator.session_state(correlation_id),
        Some(SessionState::Delegating)
    );
    assert_eq!(orchestrator.active_sessions(), vec![correlation_id]);

    assert!(orchestrator.cancel(correlation_id));
    let report = session.await.unwrap().unwrap();
    assert_eq!(report.status, OutcomeStatus::Cancelled);
    assert_eq!(report.transitions.last(), Some(&SessionState::Terminated));
    assert!(orchestrator.active_sessions().is_empty());
    conductor.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_correlation_id_is_rejected_while_running() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["wait forever"], ExecutionMode::Serial)
        .select("wait forever", "Sink");
    let config = OrchestratorConfig {
        delegation_timeout_secs: 0,
        ..OrchestratorConfig::default()
    };
    let (conductor, _, _) = build(reasoner, config);
    conductor.registry().register("Sink", "Never answers", "Sink");
    raw_agent(conductor.bus(), "Sink", |_| Vec::new());
    conductor.start();

    let orchestrator = Arc::clone(conductor.orchestrator());
    let correlation_id = Uuid::new_v4();
    let first = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .run_session(correlation_id, "stall".into(), None)
                .await
        }
    });
    while orchestrator.session_state(correlation_id).is_none() {
        tokio::task::yield_now().await;
    }

    let second = orchestrator
        .run_session(correlation_id, "again".into(), None)
        .await;
    assert!(matches!(second, Err(ConductorError::Session(_))));

    conductor.shutdown().await;
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.status, OutcomeStatus::Cancelled);
}

#[tokio::test]
async fn test_rejected_bus_request_still_gets_an_outcome() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["wait forever"], ExecutionMode::Serial)
        .select("wait forever", "Sink");
    let config = OrchestratorConfig {
        delegation_timeout_secs: 0,
        ..OrchestratorConfig::default()
    };
    let (conductor, _, _) = build(reasoner, config);
    conductor.registry().register("Sink", "Never answers", "Sink");
    raw_agent(conductor.bus(), "Sink", |_| Vec::new());

    let mut first_user = conductor.bus().subscribe("User");
    let mut second_user = conductor.bus().subscribe("User2");
    let correlation_id = conductor.send("User", "stall").unwrap();
    let orchestrator = Arc::clone(conductor.orchestrator());
    while orchestrator.session_state(correlation_id).is_none() {
        tokio::task::yield_now().await;
    }

    conductor
        .bus()
        .publish(
            ORCHESTRATOR,
            Envelope::user_request("User2", "again", Some(correlation_id)),
        )
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), second_user.recv())
        .await
        .expect("rejected requester must get an answer")
        .unwrap();
    assert_eq!(outcome.correlation_id(), Some(correlation_id));
    match outcome.payload {
        Payload::SessionOutcome {
            status,
            result,
            attempts,
        } => {
            assert_eq!(status, OutcomeStatus::Rejected);
            assert!(result.contains("already running"), "got: {result}");
            assert_eq!(attempts, 0);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // The running session is untouched and still answers its own requester.
    assert!(orchestrator.session_state(correlation_id).is_some());
    assert!(orchestrator.cancel(correlation_id));
    let first = tokio::time::timeout(Duration::from_secs(2), first_user.recv())
        .await
        .unwrap()
        .unwrap();
    match first.payload {
        Payload::SessionOutcome { status, .. } => assert_eq!(status, OutcomeStatus::Cancelled),
        other => panic!("unexpected payload {other:?}"),
    }
    conductor.shutdown().await;
}

// ---- 10. Delegation timeout -----------------------------------------------------

#[tokio::test]
async fn test_delegation_timeout_unblocks_session() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["wait forever"], ExecutionMode::Serial)
        .select("wait forever", "Sink")
        .verdicts(&[false]);
    let config = OrchestratorConfig {
        max_attempts: 1,
        delegation_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let (conductor, _, _) = build(reasoner, config);
    conductor.registry().register("Sink", "Never answers", "Sink");
    raw_agent(conductor.bus(), "Sink", |_| Vec::new());

    let report = conductor.submit("stall").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Exhausted);
    assert_eq!(
        report.context.agent_results,
        vec!["Delegation timed out after 1s"]
    );
    let sink = conductor.monitor().get_state("Sink").await.unwrap();
    assert_eq!(sink.metrics.failed, 1);
    conductor.shutdown().await;
}

// ---- 11. Concurrent sessions ------------------------------------------------------

#[tokio::test]
async fn test_concurrent_sessions_stay_isolated() {
    let reasoner = ScriptedReasoner::default()
        .select("alpha", "Dev")
        .select("beta", "Test");
    let (conductor, _, journal) = build(reasoner, OrchestratorConfig::default());
    let mut dev = ScriptedAgent::new("Dev", "alpha-done", &journal);
    dev.delay = Some(Duration::from_millis(40));
    let test = ScriptedAgent::new("Test", "beta-done", &journal);
    conductor.register_agent("Dev", "Writes code", None, Arc::new(dev));
    conductor.register_agent("Test", "Writes tests", None, Arc::new(test));

    let (alpha, beta) = tokio::join!(conductor.submit("alpha"), conductor.submit("beta"));
    let (alpha, beta) = (alpha.unwrap(), beta.unwrap());
    assert_ne!(alpha.correlation_id, beta.correlation_id);
    assert_eq!(alpha.result, "alpha-done");
    assert_eq!(beta.result, "beta-done");
    assert_eq!(alpha.context.agent_results, vec!["alpha-done"]);
    assert_eq!(beta.context.agent_results, vec!["beta-done"]);
    conductor.shutdown().await;
}

// ---- 12. Agent failure -------------------------------------------------------------

struct Crashing;

#[async_trait]
impl AgentExecutor for Crashing {
    async fn execute(
        &self,
        _task: &str,
        _context: &SessionContext,
        _retry: u32,
    ) -> ConductorResult<AgentOutput> {
        Err(ConductorError::Agent("segfault".into()))
    }
}

#[tokio::test]
async fn test_agent_failure_counts_as_result_and_is_reported() {
    let reasoner = ScriptedReasoner::default()
        .breakdown(&["crash"], ExecutionMode::Serial)
        .select("crash", "Crashy")
        .verdicts(&[false, true]);
    let (conductor, _, _) = build(reasoner, OrchestratorConfig::default());
    conductor.register_agent("Crashy", "Falls over", None, Arc::new(Crashing));

    let report = conductor.submit("crash please").await.unwrap();
    assert_eq!(report.status, OutcomeStatus::Completed);
    assert_eq!(report.attempts, 2);
    assert!(report.context.agent_results[0].starts_with("Execution error:"));

    // The side-channel notification is routed asynchronously.
    for _ in 0..100 {
        let state = conductor.monitor().get_state("Crashy").await.unwrap();
        if state.metrics.error_notifications == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let state = conductor.monitor().get_state("Crashy").await.unwrap();
    assert_eq!(state.metrics.error_notifications, 1);
    assert_eq!(state.metrics.failed, 1);
    conductor.shutdown().await;
}
