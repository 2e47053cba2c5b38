// crates/stepruntime/tests/engine_test.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepcore::{
    Action, ActionError, ActionResult, Branch, ConfigField, Credentials, ExecutionEvent, FieldType,
    Fields, FlowError, Graph, JoinMode, Node, NodeStatus, ResolutionError, RetryPolicy,
    StructuralErrorKind, TriggerType, Value,
};
use stepruntime::{
    ActionDescriptor, ActionRegistry, FlowRuntime, IntegrationInfo, NodeFailure, RunStatus,
    RuntimeConfig, StaticCredentials,
};

/// Records every config it is called with and answers with fixed fields.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Fields>>,
    reply: Fields,
}

impl Recorder {
    fn replying(reply: Fields) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reply,
        })
    }

    fn calls(&self) -> Vec<Fields> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Action for Recorder {
    async fn execute(&self, config: &Fields, _credentials: &Credentials) -> ActionResult {
        self.calls.lock().unwrap().push(config.clone());
        Ok(self.reply.clone())
    }
}

/// Fails with a transport error `failures` times, then succeeds.
struct Flaky {
    failures: usize,
    calls: Mutex<Vec<Fields>>,
}

#[async_trait]
impl Action for Flaky {
    async fn execute(&self, config: &Fields, _credentials: &Credentials) -> ActionResult {
        let mut calls = self.calls.lock().unwrap();
        calls.push(config.clone());
        if calls.len() <= self.failures {
            return Err(ActionError::Transport("connection reset".into()));
        }
        Ok(Fields::from([("ok".to_string(), Value::Bool(true))]))
    }
}

/// Sleeps, tracking how many calls overlap.
#[derive(Default)]
struct Slow {
    millis: u64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Action for Slow {
    async fn execute(&self, _config: &Fields, _credentials: &Credentials) -> ActionResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Fields::new())
    }
}

/// Needs `API_KEY` in its credentials.
struct NeedsKey;

#[async_trait]
impl Action for NeedsKey {
    async fn execute(&self, _config: &Fields, credentials: &Credentials) -> ActionResult {
        let key = credentials
            .get("API_KEY")
            .ok_or_else(|| ActionError::MissingCredential("API_KEY".into()))?;
        Ok(Fields::from([("key".to_string(), Value::from(key.as_str()))]))
    }
}

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect()
}

/// Registry builder; taking `Arc<dyn Action>` as an argument lets callers
/// pass their concrete doubles.
struct Actions(ActionRegistry);

fn actions() -> Actions {
    let mut registry = ActionRegistry::new();
    registry.register_integration(IntegrationInfo::new("test", "Test"));
    Actions(registry)
}

impl Actions {
    fn with(mut self, id: &str, executor: Arc<dyn Action>) -> Self {
        self.0.register(
            ActionDescriptor::new(id, id, executor)
                .with_field(ConfigField::optional("emailTo", FieldType::String))
                .with_credential("API_KEY"),
        );
        self
    }

    fn build(self) -> Arc<ActionRegistry> {
        Arc::new(self.0)
    }
}

fn runtime(registry: Arc<ActionRegistry>) -> FlowRuntime {
    runtime_with(registry, RuntimeConfig::default())
}

fn runtime_with(registry: Arc<ActionRegistry>, config: RuntimeConfig) -> FlowRuntime {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let credentials = StaticCredentials::new().with("test", "API_KEY", "secret");
    FlowRuntime::with_credentials(registry, config, Arc::new(credentials))
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
    }
}

fn email_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("trigger-1", "Form", TriggerType::Manual));
    graph.add_node(
        Node::action("email-1", "Send Email", "test/send-email").with_field("emailTo", "{{@trigger-1:Form.email}}"),
    );
    graph.connect("trigger-1", "email-1");
    graph
}

#[tokio::test]
async fn test_email_scenario_resolves_and_succeeds() {
    let email = Recorder::replying(fields(&[("id", "m1")]));
    let rt = runtime(actions().with("test/send-email", email.clone()).build());

    let run = rt
        .execute(&email_graph(), fields(&[("email", "a@b.com")]))
        .await
        .expect("run should start");

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.status_of("email-1"), Some(NodeStatus::Success));
    assert_eq!(email.calls(), vec![fields(&[("emailTo", "a@b.com")])]);
    assert_eq!(run.output("email-1").unwrap().fields, fields(&[("id", "m1")]));
    assert_eq!(run.node("email-1").unwrap().attempts, 1);
}

#[tokio::test]
async fn test_missing_field_fails_without_calling_action() {
    let email = Recorder::replying(fields(&[("id", "m1")]));
    let rt = runtime(actions().with("test/send-email", email.clone()).build());

    let run = rt
        .execute(&email_graph(), fields(&[("name", "Ada")]))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let trace = run.node("email-1").unwrap();
    assert_eq!(trace.status, NodeStatus::Failed);
    assert_eq!(trace.attempts, 0);
    assert_eq!(
        trace.error,
        Some(NodeFailure::Resolution(ResolutionError::MissingField {
            node_id: "trigger-1".into(),
            field: "email".into()
        }))
    );
    assert!(email.calls().is_empty(), "action must not be called");
}

#[tokio::test]
async fn test_mock_request_used_for_empty_payload() {
    let email = Recorder::replying(Fields::new());
    let rt = runtime(actions().with("test/send-email", email.clone()).build());
    let mut graph = email_graph();
    graph.nodes[0] = Node::trigger("trigger-1", "Form", TriggerType::Webhook)
        .with_field("mockRequest", Value::Object(fields(&[("email", "mock@b.com")])));

    let run = rt.execute(&graph, Fields::new()).await.unwrap();

    assert!(run.is_success());
    assert_eq!(email.calls(), vec![fields(&[("emailTo", "mock@b.com")])]);
}

fn branching_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("trigger-1", "Start", TriggerType::Manual));
    graph.add_node(Node::condition("cond", "Active?", "status === 'active'"));
    graph.add_node(Node::action("a", "A", "test/a"));
    graph.add_node(Node::action("b", "B", "test/b"));
    graph.add_node(Node::action("b2", "After B", "test/b"));
    graph.connect("trigger-1", "cond");
    graph.connect_branch("cond", Branch::True, "a");
    graph.connect_branch("cond", Branch::False, "b");
    graph.connect("b", "b2");
    graph
}

#[tokio::test]
async fn test_condition_activates_exactly_one_branch() {
    let a = Recorder::replying(Fields::new());
    let b = Recorder::replying(Fields::new());
    let rt = runtime(actions().with("test/a", a.clone()).with("test/b", b.clone()).build());

    let run = rt
        .execute(&branching_graph(), fields(&[("status", "active")]))
        .await
        .unwrap();

    assert_eq!(run.status_of("cond"), Some(NodeStatus::Success));
    assert_eq!(run.output("cond").unwrap().get("result"), Some(&Value::Bool(true)));
    assert_eq!(run.status_of("a"), Some(NodeStatus::Success));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("b2"), Some(NodeStatus::Skipped));
    assert!(run.failed_nodes().is_empty(), "skip is not failure");
    assert_eq!(a.calls().len(), 1);
    assert!(b.calls().is_empty());
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_condition_false_branch() {
    let a = Recorder::replying(Fields::new());
    let b = Recorder::replying(Fields::new());
    let rt = runtime(actions().with("test/a", a.clone()).with("test/b", b.clone()).build());

    let run = rt
        .execute(&branching_graph(), fields(&[("status", "paused")]))
        .await
        .unwrap();

    assert_eq!(run.status_of("a"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Success));
    assert_eq!(run.status_of("b2"), Some(NodeStatus::Success));
}

#[tokio::test]
async fn test_condition_on_unknown_identifier_fails_node() {
    let rt = runtime(
        actions()
            .with("test/a", Recorder::replying(Fields::new()))
            .with("test/b", Recorder::replying(Fields::new()))
            .build(),
    );

    let run = rt
        .execute(&branching_graph(), fields(&[("state", "active")]))
        .await
        .unwrap();

    assert_eq!(run.status_of("cond"), Some(NodeStatus::Failed));
    assert!(matches!(
        run.node("cond").unwrap().error,
        Some(NodeFailure::Resolution(ResolutionError::UnknownIdentifier { .. }))
    ));
    assert_eq!(run.status_of("a"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status, RunStatus::Failed);
}

/// cond -true-> a -> join, cond -false-> b -> join
fn join_graph(join: Option<JoinMode>) -> Graph {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("trigger-1", "Start", TriggerType::Manual));
    graph.add_node(Node::condition("cond", "Check", "{{@trigger-1:Start.go}} == true"));
    graph.add_node(Node::action("a", "A", "test/a"));
    graph.add_node(Node::action("b", "B", "test/a"));
    let mut join_node = Node::action("join", "Join", "test/a");
    if let Some(mode) = join {
        join_node = join_node.with_join(mode);
    }
    graph.add_node(join_node);
    graph.connect("trigger-1", "cond");
    graph.connect_branch("cond", Branch::True, "a");
    graph.connect_branch("cond", Branch::False, "b");
    graph.connect("a", "join");
    graph.connect("b", "join");
    graph
}

fn go(value: bool) -> Fields {
    Fields::from([("go".to_string(), Value::Bool(value))])
}

#[tokio::test]
async fn test_skip_stops_at_join_with_live_edge() {
    let rt = runtime(actions().with("test/a", Recorder::replying(Fields::new())).build());

    let run = rt.execute(&join_graph(None), go(true)).await.unwrap();

    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("join"), Some(NodeStatus::Success));
    assert_eq!(run.skipped_nodes(), vec!["b"]);
}

#[tokio::test]
async fn test_explicit_join_requires_every_edge() {
    let rt = runtime(actions().with("test/a", Recorder::replying(Fields::new())).build());

    let run = rt.execute(&join_graph(Some(JoinMode::All)), go(false)).await.unwrap();

    assert_eq!(run.status_of("a"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Success));
    assert_eq!(run.status_of("join"), Some(NodeStatus::Skipped));
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_fan_in_default_comes_from_config() {
    let config = RuntimeConfig {
        fan_in: JoinMode::All,
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(actions().with("test/a", Recorder::replying(Fields::new())).build(), config);

    let run = rt.execute(&join_graph(None), go(true)).await.unwrap();
    assert_eq!(run.status_of("join"), Some(NodeStatus::Skipped));

    let run = rt.execute(&join_graph(Some(JoinMode::Any)), go(true)).await.unwrap();
    assert_eq!(run.status_of("join"), Some(NodeStatus::Success));
}

#[tokio::test]
async fn test_retry_reuses_identical_config() {
    let flaky = Arc::new(Flaky {
        failures: 2,
        calls: Mutex::new(Vec::new()),
    });
    let rt = runtime(actions().with("test/send-email", flaky.clone()).build());
    let mut graph = email_graph();
    graph.nodes[1] = graph.nodes[1].clone().with_retry(fast_retry(3));
    let mut events = rt.subscribe_events();

    let run = rt.execute(&graph, fields(&[("email", "a@b.com")])).await.unwrap();

    assert_eq!(run.status_of("email-1"), Some(NodeStatus::Success));
    assert_eq!(run.node("email-1").unwrap().attempts, 3);
    let calls = flaky.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c == &calls[0]), "every attempt sees the same config");

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { attempt, .. } = event {
            retries += 1;
            assert_eq!(attempt, retries);
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_exhausted_retries_record_last_error() {
    let flaky = Arc::new(Flaky {
        failures: 10,
        calls: Mutex::new(Vec::new()),
    });
    let rt = runtime(actions().with("test/send-email", flaky.clone()).build());
    let mut graph = email_graph();
    graph.nodes[1] = graph.nodes[1].clone().with_retry(fast_retry(2));

    let run = rt.execute(&graph, fields(&[("email", "a@b.com")])).await.unwrap();

    let trace = run.node("email-1").unwrap();
    assert_eq!(trace.status, NodeStatus::Failed);
    assert_eq!(trace.attempts, 2);
    assert_eq!(
        trace.error,
        Some(NodeFailure::Action(ActionError::Transport("connection reset".into())))
    );
    assert_eq!(flaky.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_credential_is_not_retried() {
    let rt = FlowRuntime::with_credentials(
        actions().with("test/keyed", Arc::new(NeedsKey)).build(),
        RuntimeConfig::default(),
        Arc::new(StaticCredentials::new()),
    );
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("k", "Keyed", "test/keyed").with_retry(fast_retry(5)));
    graph.connect("t", "k");

    let run = rt.execute(&graph, Fields::new()).await.unwrap();

    let trace = run.node("k").unwrap();
    assert_eq!(trace.status, NodeStatus::Failed);
    assert_eq!(trace.attempts, 1);
    assert!(matches!(
        trace.error,
        Some(NodeFailure::Action(ActionError::MissingCredential(_)))
    ));
}

#[tokio::test]
async fn test_credentials_follow_integration_id() {
    let credentials = StaticCredentials::new()
        .with("int_42", "API_KEY", "per-connection")
        .unavailable("test");
    let rt = FlowRuntime::with_credentials(
        actions().with("test/keyed", Arc::new(NeedsKey)).build(),
        RuntimeConfig::default(),
        Arc::new(credentials),
    );
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("with-id", "Keyed", "test/keyed").with_integration("int_42"));
    graph.add_node(Node::action("without-id", "Keyed", "test/keyed"));
    graph.connect("t", "with-id");
    graph.connect("t", "without-id");

    let run = rt.execute(&graph, Fields::new()).await.unwrap();

    assert_eq!(
        run.output("with-id").unwrap().get("key"),
        Some(&Value::from("per-connection"))
    );
    assert!(matches!(
        run.node("without-id").unwrap().error,
        Some(NodeFailure::Credential(_))
    ));
    assert_eq!(run.status, RunStatus::Success, "one sink succeeded");
}

#[tokio::test]
async fn test_failure_does_not_abort_siblings() {
    let ok = Recorder::replying(Fields::new());
    let bad = Arc::new(Flaky {
        failures: 100,
        calls: Mutex::new(Vec::new()),
    });
    let config = RuntimeConfig {
        retry: RetryPolicy::none(),
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(actions().with("test/ok", ok.clone()).with("test/bad", bad).build(), config);

    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("bad", "Bad", "test/bad"));
    graph.add_node(Node::action("after-bad", "After", "test/ok"));
    graph.add_node(Node::action("good", "Good", "test/ok"));
    graph.connect("t", "bad");
    graph.connect("bad", "after-bad");
    graph.connect("t", "good");

    let run = rt.execute(&graph, Fields::new()).await.unwrap();

    assert_eq!(run.status_of("bad"), Some(NodeStatus::Failed));
    assert_eq!(run.status_of("after-bad"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("good"), Some(NodeStatus::Success));
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.failed_nodes(), vec!["bad"]);
    assert_eq!(run.skipped_nodes(), vec!["after-bad"]);
}

#[tokio::test]
async fn test_references_only_see_ancestors() {
    let first = Recorder::replying(fields(&[("value", "from-sibling")]));
    let second = Recorder::replying(Fields::new());
    let rt = runtime(
        actions()
            .with("test/first", first)
            .with("test/second", second.clone())
            .build(),
    );

    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("sibling", "Sibling", "test/first"));
    graph.add_node(Node::action("reader", "Reader", "test/second").with_field("emailTo", "{{@sibling:Sibling.value}}"));
    graph.connect("t", "sibling");
    graph.connect("t", "reader");

    let run = rt.execute(&graph, Fields::new()).await.unwrap();

    assert_eq!(run.status_of("sibling"), Some(NodeStatus::Success));
    assert!(matches!(
        run.node("reader").unwrap().error,
        Some(NodeFailure::Resolution(ResolutionError::UnresolvedReference { .. }))
    ));
    assert!(second.calls().is_empty());
}

fn fan_out(width: usize, action: &str) -> Graph {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    for i in 0..width {
        let id = graph.add_node(Node::action(format!("n{}", i), format!("N{}", i), action));
        graph.connect("t", id);
    }
    graph
}

#[tokio::test]
async fn test_independent_actions_run_concurrently() {
    let slow = Arc::new(Slow {
        millis: 50,
        ..Slow::default()
    });
    let rt = runtime(actions().with("test/slow", slow.clone()).build());

    let run = rt.execute(&fan_out(4, "test/slow"), Fields::new()).await.unwrap();

    assert!(run.is_success());
    assert_eq!(slow.peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let slow = Arc::new(Slow {
        millis: 10,
        ..Slow::default()
    });
    let config = RuntimeConfig {
        max_parallel_nodes: 2,
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(actions().with("test/slow", slow.clone()).build(), config);

    let run = rt.execute(&fan_out(6, "test/slow"), Fields::new()).await.unwrap();

    assert!(run.nodes.iter().all(|t| t.status == NodeStatus::Success));
    assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_sized_limits_still_run() {
    let email = Recorder::replying(fields(&[("id", "m1")]));
    let config = RuntimeConfig {
        event_buffer_size: 0,
        max_parallel_nodes: 0,
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(actions().with("test/send-email", email.clone()).build(), config);
    let mut events = rt.subscribe_events();

    let run = rt
        .execute(&email_graph(), fields(&[("email", "a@b.com")]))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(email.calls().len(), 1);
    // One slot: the subscriber sees it lagged rather than the bus panicking.
    assert!(matches!(
        events.try_recv(),
        Ok(_) | Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_))
    ));
}

#[tokio::test]
async fn test_timeout_counts_as_action_failure() {
    let slow = Arc::new(Slow {
        millis: 1_000,
        ..Slow::default()
    });
    let config = RuntimeConfig {
        node_timeout_ms: Some(20),
        retry: RetryPolicy::none(),
        ..RuntimeConfig::default()
    };
    let rt = runtime_with(actions().with("test/slow", slow).build(), config);

    let run = rt.execute(&fan_out(1, "test/slow"), Fields::new()).await.unwrap();

    assert_eq!(
        run.node("n0").unwrap().error,
        Some(NodeFailure::Action(ActionError::Timeout { ms: 20 }))
    );
}

#[tokio::test]
async fn test_cancel_skips_unfinished_nodes() {
    let slow = Arc::new(Slow {
        millis: 5_000,
        ..Slow::default()
    });
    let rt = runtime(actions().with("test/slow", slow.clone()).build());
    let mut graph = fan_out(1, "test/slow");
    graph.add_node(Node::action("after", "After", "test/slow"));
    graph.connect("n0", "after");

    let handle = rt.spawn(graph, Fields::new());
    while slow.active.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();
    let run = handle.join().await.unwrap();

    assert!(run.cancelled);
    assert_eq!(run.status_of("t"), Some(NodeStatus::Success));
    assert_eq!(run.status_of("n0"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("after"), Some(NodeStatus::Skipped));
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.output("n0").is_none());
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_before_running() {
    let email = Recorder::replying(Fields::new());
    let rt = runtime(actions().with("test/send-email", email.clone()).build());
    let mut graph = email_graph();
    graph.add_node(Node::trigger("trigger-2", "Other", TriggerType::Manual));

    let err = rt.execute(&graph, Fields::new()).await.unwrap_err();

    match err {
        FlowError::Structural(e) => assert_eq!(e.kind, StructuralErrorKind::TriggerCount),
        other => panic!("expected structural error, got {:?}", other),
    }
    assert!(email.calls().is_empty());
}

#[tokio::test]
async fn test_event_stream_brackets_the_run() {
    let rt = runtime(actions().with("test/send-email", Recorder::replying(Fields::new())).build());
    let mut events = rt.subscribe_events();

    let run = rt.execute(&email_graph(), fields(&[("email", "a@b.com")])).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ExecutionEvent::RunStarted { run_id, .. }) if *run_id == run.run_id));
    assert!(matches!(seen.last(), Some(ExecutionEvent::RunCompleted { success: true, .. })));
    let completed = seen
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_stored_workflow_round_trip() {
    let rt = runtime(actions().with("test/send-email", Recorder::replying(Fields::new())).build());
    let id = rt.register_workflow(email_graph().with_name("welcome")).await;

    assert_eq!(rt.list_workflows().await.len(), 1);
    let run = rt
        .execute_workflow(id, fields(&[("email", "a@b.com")]))
        .await
        .unwrap();
    assert!(run.is_success());

    assert!(rt.remove_workflow(id).await.is_some());
    assert!(matches!(
        rt.execute_workflow(id, Fields::new()).await,
        Err(FlowError::NotFound(_))
    ));
}
