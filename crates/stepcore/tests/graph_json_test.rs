// crates/stepcore/tests/graph_json_test.rs

use stepcore::{
    validate_structure, Branch, ConfigField, FieldType, Graph, NodeConfig, NodeKind,
    StructuralErrorKind, TriggerType, Value,
};
use std::collections::HashMap;

const AUTHORED: &str = r#"{
  "name": "Contact form",
  "nodes": [
    {
      "id": "trigger-1",
      "type": "trigger",
      "label": "Form",
      "config": {
        "triggerType": "Webhook",
        "webhookPath": "/webhooks/contact",
        "mockRequest": { "email": "a@b.com", "status": "active" }
      }
    },
    {
      "id": "cond-1",
      "type": "condition",
      "label": "Active?",
      "config": { "condition": "status === 'active'" }
    },
    {
      "id": "email-1",
      "kind": "action",
      "label": "Send Email",
      "config": {
        "actionType": "resend/send-email",
        "integrationId": "int_123",
        "emailTo": "{{@trigger-1:Form.email}}",
        "emailSubject": "Thanks"
      },
      "retry": { "maxAttempts": 5 }
    }
  ],
  "edges": [
    { "id": "e1", "source": "trigger-1", "target": "cond-1" },
    { "id": "e2", "source": "cond-1", "target": "email-1", "sourceHandle": "true" }
  ]
}"#;

fn catalog() -> HashMap<String, Vec<ConfigField>> {
    let mut catalog = HashMap::new();
    catalog.insert(
        "resend/send-email".to_string(),
        vec![
            ConfigField::required("emailTo", FieldType::String),
            ConfigField::required("emailSubject", FieldType::String),
        ],
    );
    catalog
}

#[test]
fn test_parse_authored_graph() {
    let graph = Graph::from_json(AUTHORED).unwrap();

    assert_eq!(graph.name.as_deref(), Some("Contact form"));
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges[1].branch, Some(Branch::True));

    let trigger = graph.trigger().unwrap();
    match &trigger.config {
        NodeConfig::Trigger(c) => {
            assert_eq!(c.trigger_type, Some(TriggerType::Webhook));
            let mock = c.mock_payload().unwrap();
            assert_eq!(mock["status"], Value::from("active"));
        }
        other => panic!("expected trigger config, got {:?}", other),
    }

    let email = graph.find_node("email-1").unwrap();
    assert_eq!(email.kind(), NodeKind::Action);
    assert_eq!(email.action_type(), Some("resend/send-email"));
    assert_eq!(email.retry.as_ref().unwrap().max_attempts, 5);
    match &email.config {
        NodeConfig::Action(c) => {
            assert_eq!(c.integration_id.as_deref(), Some("int_123"));
            assert!(!c.fields.contains_key("actionType"));
            assert_eq!(c.fields["emailSubject"], Value::from("Thanks"));
        }
        other => panic!("expected action config, got {:?}", other),
    }

    assert!(validate_structure(&graph, &catalog()).is_ok());
}

#[test]
fn test_round_trip_keeps_discriminants_in_config() {
    let graph = Graph::from_json(AUTHORED).unwrap();
    let json: serde_json::Value = serde_json::from_str(&graph.to_json_pretty().unwrap()).unwrap();

    assert_eq!(json["nodes"][2]["type"], "action");
    assert_eq!(json["nodes"][2]["config"]["actionType"], "resend/send-email");
    assert_eq!(json["nodes"][0]["config"]["triggerType"], "Webhook");
    assert_eq!(json["edges"][1]["branch"], "true");
    assert!(json["edges"][0].get("branch").is_none());

    let reparsed: Graph = serde_json::from_value(json).unwrap();
    assert_eq!(reparsed, graph);
}

#[test]
fn test_missing_action_type_parses_but_fails_validation() {
    let json = r#"{
      "nodes": [
        { "id": "t", "type": "trigger", "label": "Go", "config": { "triggerType": "Manual" } },
        { "id": "a", "type": "action", "label": "Something", "config": { "emailTo": "x" } }
      ],
      "edges": [ { "id": "e", "source": "t", "target": "a" } ]
    }"#;
    let graph = Graph::from_json(json).unwrap();

    let err = validate_structure(&graph, &catalog()).unwrap_err();
    assert_eq!(err.kind, StructuralErrorKind::IncompleteNode);
    assert_eq!(err.node_ids, vec!["a"]);
    assert!(err.reason.contains("missing actionType"));
}

#[test]
fn test_unknown_trigger_type_is_a_parse_error() {
    let json = r#"{
      "nodes": [ { "id": "t", "type": "trigger", "label": "Go", "config": { "triggerType": "Carrier Pigeon" } } ],
      "edges": []
    }"#;
    assert!(Graph::from_json(json).is_err());
}

const EDITOR_SHAPE: &str = r#"{
  "name": "Welcome",
  "nodes": [
    {
      "id": "t",
      "type": "trigger",
      "position": { "x": 0, "y": 0 },
      "data": {
        "label": "Form",
        "description": "Signup form",
        "type": "trigger",
        "config": { "triggerType": "Manual" },
        "status": "idle"
      }
    },
    {
      "id": "email",
      "type": "action",
      "position": { "x": 200, "y": 0 },
      "data": {
        "label": "Send Welcome",
        "type": "action",
        "config": {
          "actionType": "resend/send-email",
          "emailTo": "{{@t:Form.email}}",
          "emailSubject": "Hi"
        },
        "status": "idle"
      }
    }
  ],
  "edges": [ { "id": "e1", "source": "t", "target": "email", "type": "default" } ]
}"#;

#[test]
fn test_editor_node_shape_reads_nested_data() {
    let graph = Graph::from_json(EDITOR_SHAPE).unwrap();

    let trigger = graph.trigger().unwrap();
    assert_eq!(trigger.label, "Form");
    match &trigger.config {
        NodeConfig::Trigger(c) => assert_eq!(c.trigger_type, Some(TriggerType::Manual)),
        other => panic!("expected trigger config, got {:?}", other),
    }

    let email = graph.find_node("email").unwrap();
    assert_eq!(email.label, "Send Welcome");
    assert_eq!(email.action_type(), Some("resend/send-email"));
    assert!(validate_structure(&graph, &catalog()).is_ok());

    let json: serde_json::Value = serde_json::from_str(&graph.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["nodes"][1]["config"]["actionType"], "resend/send-email");
    assert!(json["nodes"][1].get("data").is_none());
}

#[test]
fn test_node_without_any_type_is_a_parse_error() {
    let json = r#"{
      "nodes": [ { "id": "t", "data": { "label": "Go", "config": { "triggerType": "Manual" } } } ],
      "edges": []
    }"#;
    assert!(Graph::from_json(json).is_err());
}
