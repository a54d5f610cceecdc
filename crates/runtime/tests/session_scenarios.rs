#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Turn loop scenarios against a scripted model endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use secretary_runtime::memory::{MemoryRecord, MemoryStore, SharedMemory};
use secretary_runtime::providers::{
    ChatRequest, Fragment, FragmentStream, Message, ModelEndpoint, ProviderError, Role, ToolCall,
};
use secretary_runtime::tools::system_tools::GetTimeTool;
use secretary_runtime::tools::{Tool, ToolError, ToolRegistry};
use secretary_runtime::*;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// One scripted response to a chat request.
#[derive(Clone)]
enum Step {
    Reply(Vec<Result<Fragment, String>>),
    ConnectError(u16),
    Stall,
}

/// Replays steps in order; the last step repeats once the script runs out.
struct ScriptedEndpoint {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedEndpoint {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());

        let step = {
            let next = self.steps.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last.clone().expect("script is empty"),
            }
        };

        match step {
            Step::Reply(fragments) => {
                let items: Vec<Result<Fragment, ProviderError>> = fragments
                    .into_iter()
                    .map(|f| f.map_err(ProviderError::Stream))
                    .collect();
                Ok(futures_util::stream::iter(items).boxed())
            }
            Step::ConnectError(status) => Err(ProviderError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Step::Stall => Ok(futures_util::stream::pending().boxed()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn text(content: &str) -> Step {
    Step::Reply(vec![Ok(Fragment::text(content)), Ok(Fragment::done())])
}

fn calls(names: &[&str]) -> Step {
    let calls = names.iter().map(|n| ToolCall::new(*n, json!({}))).collect();
    Step::Reply(vec![Ok(Fragment::tool_calls(calls)), Ok(Fragment::done())])
}

/// Counts executions and records their order in a shared log.
struct RecordingTool {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records that it ran"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<String, ToolError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.name.clone());
        Ok(format!("{} ran", self.name))
    }
}

/// Cancels the turn while it is running, then finishes normally.
struct CancellingTool {
    token: CancellationToken,
}

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "cancel_turn"
    }

    fn description(&self) -> &str {
        "Cancels the current turn"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<String, ToolError> {
        self.token.cancel();
        Ok("cancel requested".to_string())
    }
}

/// Sleeps, then records that it finished.
struct DelayedTool {
    name: &'static str,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for DelayedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Finishes after a delay"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(format!("{} finished", self.name))
    }
}

struct Harness {
    _temp_dir: TempDir,
    memory: Arc<SharedMemory>,
    log: Arc<Mutex<Vec<String>>>,
    count: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self::with_memory(MemoryRecord::default())
    }

    fn with_memory(record: MemoryRecord) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::new(temp_dir.path().join("memory.json"));
        Self {
            _temp_dir: temp_dir,
            memory: Arc::new(SharedMemory::in_memory(store, record)),
            log: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn registry(&self, extra: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::with_timeout(Duration::from_secs(5));
        registry
            .register(Arc::new(GetTimeTool::with_clock(|| "2024-01-01 00:00:00".to_string())))
            .unwrap();
        for name in ["first", "second"] {
            registry
                .register(Arc::new(RecordingTool {
                    name: name.to_string(),
                    log: self.log.clone(),
                    count: self.count.clone(),
                }))
                .unwrap();
        }
        for tool in extra {
            registry.register(tool).unwrap();
        }
        Arc::new(registry)
    }

    fn driver(&self, endpoint: Arc<ScriptedEndpoint>, config: SessionConfig) -> SessionDriver {
        self.driver_with_tools(endpoint, config, Vec::new())
    }

    fn driver_with_tools(
        &self,
        endpoint: Arc<ScriptedEndpoint>,
        config: SessionConfig,
        extra: Vec<Arc<dyn Tool>>,
    ) -> SessionDriver {
        SessionDriver::new(&config, endpoint, self.registry(extra), self.memory.clone()).unwrap()
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        system_prompt: Some("You are a secretary.".to_string()),
        inject_memory: false,
        max_retries: 0,
        summarize: SummarizeMode::Off,
        ..SessionConfig::default()
    }
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn test_time_question_scenario() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["get_time"]), text("It is 00:00:00.")]);
    let mut driver = harness.driver(endpoint.clone(), config());

    let outcome = driver.run_turn("what time is it").await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "It is 00:00:00.".to_string(),
            tools_used: vec!["get_time".to_string()],
        }
    );

    let messages = driver.context().messages();
    assert_eq!(messages[0].role, Role::System);
    let history = &messages[1..];
    assert_eq!(
        roles(history),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(history[0].content, "what time is it");
    assert_eq!(history[1].content, "");
    assert_eq!(history[1].tool_calls, vec![ToolCall::new("get_time", json!({}))]);
    assert_eq!(history[2].content, "2024-01-01 00:00:00");
    assert_eq!(history[3].content, "It is 00:00:00.");
    assert_eq!(driver.state(), TurnState::Done);

    // second request carried the tool result and the tool schemas
    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].stream);
    assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);
    assert_eq!(requests[0].tools.len(), 3);
}

#[tokio::test]
async fn test_max_iterations_bound() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["first"])]);
    let mut driver = harness.driver(endpoint.clone(), config());

    let outcome = driver.run_turn("loop forever").await.unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::MaxIterationsExceeded { iterations: 5, .. }
    ));
    assert_eq!(harness.count.load(Ordering::SeqCst), 5);
    assert_eq!(endpoint.requests().len(), 5);
    assert_eq!(driver.state(), TurnState::Terminated);
}

#[tokio::test]
async fn test_partial_text_reported_on_max_iterations() {
    let harness = Harness::new();
    let step = Step::Reply(vec![
        Ok(Fragment::text("Still checking")),
        Ok(Fragment::tool_calls(vec![ToolCall::new("first", json!({}))])),
        Ok(Fragment::done()),
    ]);
    let endpoint = ScriptedEndpoint::new(vec![step]);
    let mut driver = harness.driver(
        endpoint,
        SessionConfig {
            max_iterations: 2,
            ..config()
        },
    );

    let outcome = driver.run_turn("go").await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::MaxIterationsExceeded {
            partial_text: "Still checking".to_string(),
            iterations: 2,
        }
    );
}

#[tokio::test]
async fn test_unknown_tool_is_contained() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["nonexistent"]), text("Sorry.")]);
    let mut driver = harness.driver(endpoint, config());

    let outcome = driver.run_turn("do something").await.unwrap();
    assert_eq!(outcome.text(), "Sorry.");

    let messages = driver.context().messages();
    let tool_message = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_message.content, "Unknown tool: nonexistent");
}

#[tokio::test]
async fn test_tool_argument_errors_are_contained() {
    let harness = Harness::new();
    let bad_call = Step::Reply(vec![
        Ok(Fragment::tool_calls(vec![ToolCall::new("get_time", json!("{not json"))])),
        Ok(Fragment::done()),
    ]);
    let endpoint = ScriptedEndpoint::new(vec![bad_call, text("Let me try again later.")]);
    let mut driver = harness.driver(endpoint, config());

    let outcome = driver.run_turn("time?").await.unwrap();
    assert!(outcome.is_completed());

    let messages = driver.context().messages();
    let tool_message = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_message.content.starts_with("Could not parse arguments for get_time"));
}

#[tokio::test]
async fn test_tools_run_in_order() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["second", "first", "second"]), text("ok")]);
    let mut driver = harness.driver(endpoint, config());

    let outcome = driver.run_turn("run them").await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "ok".to_string(),
            tools_used: vec!["second".to_string(), "first".to_string()],
        }
    );
    assert_eq!(*harness.log.lock().unwrap(), vec!["second", "first", "second"]);

    let messages = driver.context().messages();
    let tool_outputs: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tool_outputs, vec!["second ran", "first ran", "second ran"]);
}

#[tokio::test]
async fn test_timed_out_tool_finishes_before_next_starts() {
    let harness = Harness::new();
    let mut registry = ToolRegistry::with_timeout(Duration::from_millis(50));
    for (name, delay) in [("slow_write", 200), ("fast_read", 0)] {
        registry
            .register(Arc::new(DelayedTool {
                name,
                delay: Duration::from_millis(delay),
                log: harness.log.clone(),
            }))
            .unwrap();
    }
    let endpoint = ScriptedEndpoint::new(vec![calls(&["slow_write", "fast_read"]), text("ok")]);
    let mut driver =
        SessionDriver::new(&config(), endpoint, Arc::new(registry), harness.memory.clone()).unwrap();

    let outcome = driver.run_turn("write then read").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(*harness.log.lock().unwrap(), vec!["slow_write", "fast_read"]);

    let messages = driver.context().messages();
    let tool_outputs: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        tool_outputs,
        vec!["Tool slow_write timed out after 50ms", "fast_read finished"]
    );
}

#[tokio::test]
async fn test_oversized_tool_round_keeps_window_within_limit() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["first"; 8]), text("all done")]);
    let mut driver = harness.driver(
        endpoint.clone(),
        SessionConfig {
            max_history_length: 10,
            inject_memory: true,
            ..config()
        },
    );

    let outcome = driver.run_turn("run everything").await.unwrap();
    assert!(outcome.is_completed());

    // system + memory leave room for a request carrying 7 calls plus results
    assert_eq!(harness.count.load(Ordering::SeqCst), 7);
    for request in endpoint.requests() {
        assert!(request.messages.len() <= 10);
    }
    let sent = &endpoint.requests()[1].messages;
    assert_eq!(sent.len(), 10);
    let request = sent.iter().find(|m| m.requests_tools()).unwrap();
    assert_eq!(request.tool_calls.len(), 7);
    assert_eq!(sent.iter().filter(|m| m.role == Role::Tool).count(), 7);
}

#[tokio::test]
async fn test_last_non_empty_tool_list_wins() {
    let harness = Harness::new();
    let streamed = Step::Reply(vec![
        Ok(Fragment::tool_calls(vec![ToolCall::new("first", json!({}))])),
        Ok(Fragment::tool_calls(vec![
            ToolCall::new("first", json!({})),
            ToolCall::new("second", json!({})),
        ])),
        Ok(Fragment::tool_calls(vec![])),
        Ok(Fragment::done()),
    ]);
    let endpoint = ScriptedEndpoint::new(vec![streamed, text("both done")]);
    let mut driver = harness.driver(endpoint, config());

    driver.run_turn("do both").await.unwrap();
    assert_eq!(*harness.log.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_done_fragment_ends_stream() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::Reply(vec![
        Ok(Fragment::text("Hel")),
        Ok(Fragment::text("lo").finished()),
        Ok(Fragment::text(" ignored")),
    ])]);
    let mut driver = harness.driver(endpoint, config());

    let outcome = driver.run_turn("hi").await.unwrap();
    assert_eq!(outcome.text(), "Hello");
}

#[tokio::test]
async fn test_endpoint_error_surfaces_without_commit() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::ConnectError(500)]);
    let mut driver = harness.driver(endpoint, config());

    let result = driver.run_turn("hello").await;
    assert!(matches!(
        result,
        Err(RuntimeError::Endpoint(ProviderError::Status { status: 500, .. }))
    ));
    assert_eq!(roles(&driver.context().messages()), vec![Role::System, Role::User]);
}

#[tokio::test]
async fn test_stream_error_discards_partial_reply() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::Reply(vec![
        Ok(Fragment::text("partial")),
        Err("connection reset".to_string()),
    ])]);
    let mut driver = harness.driver(endpoint, config());

    let result = driver.run_turn("hello").await;
    assert!(matches!(result, Err(RuntimeError::Endpoint(ProviderError::Stream(_)))));
    assert!(driver
        .context()
        .messages()
        .iter()
        .all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn test_transient_failure_retried_with_same_window() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::ConnectError(503), text("recovered")]);
    let mut driver = harness.driver(
        endpoint.clone(),
        SessionConfig {
            max_retries: 1,
            ..config()
        },
    );

    let outcome = driver.run_turn("hello").await.unwrap();
    assert_eq!(outcome.text(), "recovered");

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::ConnectError(401), text("unreachable")]);
    let mut driver = harness.driver(
        endpoint.clone(),
        SessionConfig {
            max_retries: 3,
            ..config()
        },
    );

    assert!(driver.run_turn("hello").await.is_err());
    assert_eq!(endpoint.requests().len(), 1);
}

#[tokio::test]
async fn test_endpoint_timeout() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::Stall]);
    let mut driver = harness
        .driver(endpoint, config())
        .with_endpoint_timeout(Duration::from_millis(50));

    let result = driver.run_turn("hello").await;
    assert!(matches!(result, Err(RuntimeError::EndpointTimeout { timeout_ms: 50 })));
    assert_eq!(roles(&driver.context().messages()), vec![Role::System, Role::User]);
}

#[tokio::test]
async fn test_cancel_before_model_call() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![text("never")]);
    let mut driver = harness.driver(endpoint.clone(), config());

    let token = CancellationToken::new();
    token.cancel();
    let outcome = driver.run_turn_with_cancel("hello", &token).await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Cancelled {
            partial_text: String::new()
        }
    );
    assert!(endpoint.requests().is_empty());
}

#[tokio::test]
async fn test_cancel_during_stalled_model_call() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![Step::Stall]);
    let mut driver = harness.driver(endpoint, config());

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = driver.run_turn_with_cancel("hello", &token).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Cancelled { .. }));
    assert!(driver
        .context()
        .messages()
        .iter()
        .all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn test_cancel_during_tools_keeps_pairing() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["cancel_turn", "first"]), text("unreachable")]);
    let mut driver = harness.driver_with_tools(
        endpoint.clone(),
        config(),
        vec![Arc::new(CancellingTool {
            token: token.clone(),
        }) as Arc<dyn Tool>],
    );

    let outcome = driver.run_turn_with_cancel("stop soon", &token).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Cancelled { .. }));

    // the running tool finished, the next one never started
    assert_eq!(harness.count.load(Ordering::SeqCst), 0);
    let messages = driver.context().messages();
    assert_eq!(
        roles(&messages[1..]),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Tool]
    );
    assert_eq!(messages[3].content, "cancel requested");
    assert_eq!(messages[4].content, "Tool first was cancelled before it ran");
    assert_eq!(endpoint.requests().len(), 1);
}

#[tokio::test]
async fn test_dangling_tool_request_discarded_next_turn() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![text("fresh start")]);
    let mut driver = harness.driver(endpoint.clone(), config());

    driver.context_mut().append_user("earlier");
    driver
        .context_mut()
        .append_assistant("", vec![ToolCall::new("first", json!({}))]);

    driver.run_turn("again").await.unwrap();

    let sent = &endpoint.requests()[0].messages;
    assert!(sent.iter().all(|m| !m.requests_tools()));
    assert_eq!(harness.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_memory_snapshot_injected() {
    let harness = Harness::with_memory(MemoryRecord {
        long_time_targets: vec!["pass the exam".to_string()],
        ..MemoryRecord::default()
    });
    let endpoint = ScriptedEndpoint::new(vec![text("Good luck.")]);
    let mut driver = harness.driver(
        endpoint.clone(),
        SessionConfig {
            inject_memory: true,
            ..config()
        },
    );

    driver.run_turn("hi").await.unwrap();

    let sent = &endpoint.requests()[0].messages;
    assert_eq!(roles(sent), vec![Role::System, Role::System, Role::User]);
    assert!(sent[1].content.contains("pass the exam"));
    // the snapshot is not stored in the context
    assert_eq!(driver.context().len(), 3);
}

fn memory_reply(json: &str) -> Step {
    Step::Reply(vec![Ok(Fragment::text(json).finished())])
}

#[tokio::test]
async fn test_inline_summary_merges_memory() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![text("Noted.")]);
    let summary_endpoint = ScriptedEndpoint::new(vec![memory_reply(
        r#"<think>exam</think>{"longTimeTargets": ["pass the exam"], "causes": [], "toolsToAssist": []}"#,
    )]);
    let summarizer = Arc::new(TurnSummarizer::new(
        summary_endpoint.clone(),
        "deepseek-r1:8b",
        harness.memory.clone(),
        Duration::from_secs(5),
    ));
    let mut driver = harness
        .driver(
            endpoint,
            SessionConfig {
                summarize: SummarizeMode::Inline,
                ..config()
            },
        )
        .with_summarizer(summarizer);

    driver.run_turn("I have an exam next week").await.unwrap();

    assert_eq!(harness.memory.snapshot().long_time_targets, vec!["pass the exam"]);
    let request = &summary_endpoint.requests()[0];
    assert_eq!(request.model, "deepseek-r1:8b");
    assert!(request.tools.is_empty());
    assert!(request.messages[1].content.contains("I have an exam next week"));
}

#[tokio::test]
async fn test_background_summary_flush() {
    let harness = Harness::new();
    let endpoint = ScriptedEndpoint::new(vec![calls(&["first"]), text("Done.")]);
    let summary_endpoint = ScriptedEndpoint::new(vec![memory_reply(
        r#"{"longTimeTargets": [], "causes": [], "toolsToAssist": ["first"]}"#,
    )]);
    let summarizer = Arc::new(TurnSummarizer::new(
        summary_endpoint,
        "deepseek-r1:8b",
        harness.memory.clone(),
        Duration::from_secs(5),
    ));
    let mut driver = harness
        .driver(
            endpoint,
            SessionConfig {
                summarize: SummarizeMode::Background,
                ..config()
            },
        )
        .with_summarizer(summarizer);

    driver.run_turn("use the first tool").await.unwrap();
    let outcomes = driver.flush_summaries().await;

    assert_eq!(outcomes, vec![SummaryOutcome::Merged]);
    assert_eq!(harness.memory.snapshot().tools_to_assist, vec!["first"]);
    assert!(driver.flush_summaries().await.is_empty());
}

#[tokio::test]
async fn test_malformed_summary_leaves_memory_untouched() {
    let harness = Harness::with_memory(MemoryRecord {
        causes: vec!["existing".to_string()],
        ..MemoryRecord::default()
    });
    let summary_endpoint = ScriptedEndpoint::new(vec![memory_reply("I could not find anything.")]);
    let summarizer = TurnSummarizer::new(
        summary_endpoint,
        "deepseek-r1:8b",
        harness.memory.clone(),
        Duration::from_secs(5),
    );

    let outcome = summarizer.summarize("hi", "hello", &[]).await;
    assert!(matches!(outcome, SummaryOutcome::Skipped(_)));
    assert_eq!(harness.memory.snapshot().causes, vec!["existing"]);
}

#[tokio::test]
async fn test_summary_endpoint_failure_is_skipped() {
    let harness = Harness::new();
    let summary_endpoint = ScriptedEndpoint::new(vec![Step::ConnectError(502)]);
    let summarizer = TurnSummarizer::new(
        summary_endpoint,
        "deepseek-r1:8b",
        harness.memory.clone(),
        Duration::from_secs(5),
    );

    let outcome = summarizer.summarize("hi", "hello", &[]).await;
    assert!(matches!(outcome, SummaryOutcome::Skipped(_)));
    assert!(harness.memory.snapshot().is_empty());
}

#[tokio::test]
async fn test_repeated_summary_is_unchanged() {
    let harness = Harness::new();
    let reply = r#"{"longTimeTargets": ["a"], "causes": [], "toolsToAssist": []}"#;
    let summary_endpoint = ScriptedEndpoint::new(vec![memory_reply(reply)]);
    let summarizer = TurnSummarizer::new(
        summary_endpoint,
        "deepseek-r1:8b",
        harness.memory.clone(),
        Duration::from_secs(5),
    );

    assert_eq!(summarizer.summarize("u", "a", &[]).await, SummaryOutcome::Merged);
    assert_eq!(summarizer.summarize("u", "a", &[]).await, SummaryOutcome::Unchanged);
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

    #[test]
    fn prop_tool_rounds_never_exceed_bound(max_iterations in 1usize..8) {
        let harness = Harness::new();
        let endpoint = ScriptedEndpoint::new(vec![calls(&["first"])]);
        let mut driver = harness.driver(
            endpoint.clone(),
            SessionConfig { max_iterations, ..config() },
        );

        let outcome = tokio_test::block_on(driver.run_turn("loop")).unwrap();

        let is_capped = matches!(outcome, TurnOutcome::MaxIterationsExceeded { .. });
        proptest::prop_assert!(is_capped);
        proptest::prop_assert_eq!(harness.count.load(Ordering::SeqCst), max_iterations);
        proptest::prop_assert_eq!(endpoint.requests().len(), max_iterations);
    }
}
