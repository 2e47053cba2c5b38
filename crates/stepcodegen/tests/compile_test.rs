// crates/stepcodegen/tests/compile_test.rs

use async_trait::async_trait;
use std::sync::Arc;
use stepcodegen::{compile, CompileError, Compiler};
use stepcore::{
    Action, ActionResult, Branch, Credentials, Fields, Graph, JoinMode, Node, RetryPolicy,
    StructuralErrorKind, TriggerType,
};
use stepplugins::builtin_registry;
use stepruntime::{ActionDescriptor, IntegrationInfo};

fn signup() -> Graph {
    let mut graph = Graph::new().with_name("Signup flow");
    graph.add_node(Node::trigger("trigger-1", "Form", TriggerType::Manual));
    graph.add_node(
        Node::action("email-1", "Welcome", "resend/send-email")
            .with_field("emailTo", "{{@trigger-1:Form.email}}")
            .with_field("emailSubject", "Welcome {{@trigger-1:Form.name}}!"),
    );
    graph.add_node(Node::action("log-1", "Audit", "Log").with_field("message", "sent {{@email-1:Welcome.id}}"));
    graph.connect("trigger-1", "email-1");
    graph.connect("email-1", "log-1");
    graph
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("missing `{}` in:\n{}", needle, haystack))
}

#[test]
fn test_compiles_calls_in_topological_order() {
    let compiled = compile(&signup(), &builtin_registry()).unwrap();
    let src = &compiled.source;

    assert_eq!(compiled.function_name, "signupFlowWorkflow");
    assert!(src.contains("export async function signupFlowWorkflow(input: Output = {}): Promise<WorkflowResult> {"));
    assert!(src.contains(r#"import { sendEmailStep } from "./steps/resend-send-email";"#));
    assert!(src.contains(r#"import { logStep } from "./steps/debug-log";"#));

    let email = position(
        src,
        r#"node_email_1 = await sendEmailStep({ "emailSubject": `Welcome ${text(ref(node_trigger_1, "name", "{{@trigger-1:Form.name}}"))}!`, "emailTo": text(ref(node_trigger_1, "email", "{{@trigger-1:Form.email}}")) });"#,
    );
    let log = position(src, r#"node_log_1 = await logStep({ "message": `sent ${text(ref(node_email_1, "id", "{{@email-1:Welcome.id}}"))}` });"#);
    assert!(email < log);

    assert!(src.contains("if (node_trigger_1 !== undefined) {"));
    assert!(src.contains("if (node_email_1 !== undefined) {"));
    assert!(src.contains("const succeeded = [node_log_1].some((output) => output !== undefined);"));
}

#[test]
fn test_declares_dependencies_and_env_vars() {
    let compiled = compile(&signup(), &builtin_registry()).unwrap();

    assert_eq!(
        compiled.step_sources.keys().collect::<Vec<_>>(),
        vec!["steps/debug-log.ts", "steps/resend-send-email.ts"]
    );
    assert!(compiled.step_sources["steps/resend-send-email.ts"].contains("export async function sendEmailStep("));
    assert_eq!(compiled.dependencies.len(), 1);
    assert_eq!(compiled.dependencies["resend"], "^6.4.0");

    let env = compiled.env_example();
    assert!(env.contains("RESEND_API_KEY=\n"));
    assert!(env.contains("# Default sender email address\nRESEND_FROM_EMAIL=\n"));

    let manifest: serde_json::Value = serde_json::from_str(&compiled.package_json("signup")).unwrap();
    assert_eq!(manifest["name"], "signup");
    assert_eq!(manifest["dependencies"]["resend"], "^6.4.0");

    let files: Vec<String> = compiled.files("signup").into_iter().map(|(path, _)| path).collect();
    assert_eq!(
        files,
        vec![
            "workflow.ts",
            "steps/debug-log.ts",
            "steps/resend-send-email.ts",
            "package.json",
            ".env.example"
        ]
    );
}

#[test]
fn test_unknown_action_fails_before_any_output() {
    let mut graph = signup();
    graph.add_node(Node::action("fax-1", "Fax", "fax/send"));
    graph.connect("trigger-1", "fax-1");

    let err = compile(&graph, &builtin_registry()).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownAction {
            node_id: "fax-1".into(),
            action_type: "fax/send".into()
        }
    );
}

#[test]
fn test_structural_errors_are_compile_errors() {
    let mut graph = signup();
    graph.connect("log-1", "email-1");

    match compile(&graph, &builtin_registry()) {
        Err(CompileError::Structural(e)) => assert_eq!(e.kind, StructuralErrorKind::Cycle),
        other => panic!("expected a cycle error, got {:?}", other.map(|c| c.function_name)),
    }
}

#[test]
fn test_reference_to_sibling_is_rejected() {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("a", "A", "http/request").with_field("endpoint", "https://example.com"));
    graph.add_node(Node::action("b", "B", "debug/log").with_field("message", "{{@a:A.status}}"));
    graph.connect("t", "a");
    graph.connect("t", "b");

    assert_eq!(
        compile(&graph, &builtin_registry()).unwrap_err(),
        CompileError::NotAncestor {
            node_id: "b".into(),
            target: "a".into()
        }
    );
}

#[test]
fn test_reference_checks_declared_outputs() {
    let mut graph = signup();
    graph.nodes[2] = Node::action("log-1", "Audit", "debug/log").with_field("message", "{{@email-1:Welcome.messageId}}");
    assert_eq!(
        compile(&graph, &builtin_registry()).unwrap_err(),
        CompileError::MissingField {
            node_id: "log-1".into(),
            target: "email-1".into(),
            field: "messageId".into()
        }
    );

    graph.nodes[2] = Node::action("log-1", "Audit", "debug/log").with_field("message", "{{@ghost:Gone.id}}");
    assert_eq!(
        compile(&graph, &builtin_registry()).unwrap_err(),
        CompileError::UnresolvedReference {
            node_id: "log-1".into(),
            target: "ghost".into()
        }
    );
}

#[test]
fn test_condition_and_parallel_layer_lowering() {
    let mut graph = Graph::new().with_name("triage");
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::condition("c", "Active?", "status === 'active'"));
    graph.add_node(Node::action("yes", "Notify", "slack/send-message")
        .with_field("slackChannel", "#ops")
        .with_field("slackMessage", "active"));
    graph.add_node(Node::action("no", "File", "linear/create-ticket").with_field("ticketTitle", "inactive"));
    graph.add_node(Node::transform("m", "Combine", "merge").with_join(JoinMode::All));
    graph.connect("t", "c");
    graph.connect_branch("c", Branch::True, "yes");
    graph.connect_branch("c", Branch::False, "no");
    graph.connect("yes", "m");
    graph.connect("no", "m");

    let src = compile(&graph, &builtin_registry()).unwrap().source;

    assert!(src.contains("const upstream = live(node_t !== undefined ? node_t : undefined);"));
    assert!(src.contains(r#"const outcome = equals(local(upstream, "status"), "active");"#));
    assert!(src.contains("if (node_c?.result === true) {"));
    assert!(src.contains("if (node_c?.result === false) {"));
    assert!(src.contains("await Promise.all(["));
    assert!(src.contains("if (node_yes !== undefined && node_no !== undefined) {"));
    assert!(src.contains("node_m = merge(live("));
    assert!(position(&src, "await Promise.all([") > position(&src, "node_c = { result: outcome };"));
}

#[test]
fn test_fan_in_default_and_retry_policy() {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("a", "A", "debug/log"));
    graph.add_node(Node::action("b", "B", "debug/log"));
    graph.add_node(Node::action("z", "Z", "http/request")
        .with_field("endpoint", "https://example.com/{{@a:A.message}}")
        .with_retry(RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1000,
        }));
    graph.connect("t", "a");
    graph.connect("t", "b");
    graph.connect("a", "z");
    graph.connect("b", "z");

    let any = compile(&graph, &builtin_registry()).unwrap().source;
    assert!(any.contains("if (node_a !== undefined || node_b !== undefined) {"));
    assert!(any.contains("node_z = await retry(() => httpRequestStep({"));
    assert!(any.contains(", 4, 100, 2, 1000);"));

    let registry = builtin_registry();
    let all = Compiler::new(&graph, &registry).with_fan_in(JoinMode::All).compile().unwrap().source;
    assert!(all.contains("if (node_a !== undefined && node_b !== undefined) {"));
}

#[test]
fn test_transforms_lower_to_inline_objects() {
    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Webhook).with_field("mockRequest", {
        let mut mock = Fields::new();
        mock.insert("name".into(), "Ada".into());
        stepcore::Value::Object(mock)
    }));
    let mut mapping = Fields::new();
    mapping.insert("greeting".into(), "Hi {{@t:Start.name}}".into());
    graph.add_node(Node::transform("map", "Shape", "Map Data").with_field("fields", stepcore::Value::Object(mapping)));
    graph.add_node(Node::transform("js", "Encode", "json-stringify").with_field("input", "{{@map:Shape.greeting}}"));
    graph.add_node(Node::action("log", "Log", "debug/log").with_field("message", "{{@js:Encode.json}}"));
    graph.connect("t", "map");
    graph.connect("map", "js");
    graph.connect("js", "log");

    let src = compile(&graph, &builtin_registry()).unwrap().source;

    assert!(src.contains(r#"const node_t: Output = Object.keys(input).length > 0 ? input : {"name":"Ada"};"#));
    assert!(src.contains(r#"node_map = { "greeting": `Hi ${text(ref(node_t, "name", "{{@t:Start.name}}"))}` };"#));
    assert!(src.contains(r#"node_js = { json: JSON.stringify(ref(node_map, "greeting", "{{@map:Shape.greeting}}")) };"#));
}

struct Opaque;

#[async_trait]
impl Action for Opaque {
    async fn execute(&self, _config: &Fields, _credentials: &Credentials) -> ActionResult {
        Ok(Fields::new())
    }
}

#[test]
fn test_action_without_step_source_cannot_compile() {
    let mut registry = builtin_registry();
    registry.register_integration(IntegrationInfo::new("internal", "Internal"));
    registry.register(ActionDescriptor::new("internal/opaque", "Opaque", Arc::new(Opaque)));

    let mut graph = Graph::new();
    graph.add_node(Node::trigger("t", "Start", TriggerType::Manual));
    graph.add_node(Node::action("o", "Opaque", "internal/opaque"));
    graph.connect("t", "o");

    assert!(matches!(
        compile(&graph, &registry),
        Err(CompileError::InvalidConfig { ref node_id, .. }) if node_id == "o"
    ));
}
