use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub type NodeId = String;

/// Named field set carried by node configs and outputs.
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Manual,
    Webhook,
    Schedule,
}

impl TriggerType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Manual" | "manual" => Some(TriggerType::Manual),
            "Webhook" | "webhook" => Some(TriggerType::Webhook),
            "Schedule" | "schedule" => Some(TriggerType::Schedule),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "Manual",
            TriggerType::Webhook => "Webhook",
            TriggerType::Schedule => "Schedule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerConfig {
    pub trigger_type: Option<TriggerType>,
    /// `webhookPath`, `scheduleCron`, `mockRequest`, ...
    pub settings: Fields,
}

impl TriggerConfig {
    /// Sample payload stored on webhook triggers, used when a run starts
    /// without one.
    pub fn mock_payload(&self) -> Option<Fields> {
        self.settings.get("mockRequest")?.as_object().cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionConfig {
    pub action_type: Option<String>,
    /// Selects the credential set handed to the action.
    pub integration_id: Option<String>,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionConfig {
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformConfig {
    pub transform_type: Option<String>,
    pub fields: Fields,
}

/// Kind-specific configuration. The variant is the node's kind; the
/// discriminant inside it may still be missing, which validation reports as
/// an incomplete node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    Condition(ConditionConfig),
    Transform(TransformConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::Trigger(_) => NodeKind::Trigger,
            NodeConfig::Action(_) => NodeKind::Action,
            NodeConfig::Condition(_) => NodeKind::Condition,
            NodeConfig::Transform(_) => NodeKind::Transform,
        }
    }

    fn from_map(kind: NodeKind, mut map: Fields) -> Result<Self, String> {
        let mut take_str = |key: &str| -> Result<Option<String>, String> {
            match map.remove(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
                Some(Value::String(s)) => Ok(Some(s)),
                Some(other) => Err(format!("'{}' must be a string, got {}", key, other.type_name())),
            }
        };

        Ok(match kind {
            NodeKind::Trigger => {
                let trigger_type = match take_str("triggerType")? {
                    Some(s) => Some(
                        TriggerType::parse(&s).ok_or_else(|| format!("unknown triggerType '{}'", s))?,
                    ),
                    None => None,
                };
                NodeConfig::Trigger(TriggerConfig {
                    trigger_type,
                    settings: map,
                })
            }
            NodeKind::Action => {
                let action_type = take_str("actionType")?;
                let integration_id = take_str("integrationId")?;
                NodeConfig::Action(ActionConfig {
                    action_type,
                    integration_id,
                    fields: map,
                })
            }
            NodeKind::Condition => NodeConfig::Condition(ConditionConfig {
                condition: take_str("condition")?,
            }),
            NodeKind::Transform => {
                let transform_type = take_str("transformType")?;
                NodeConfig::Transform(TransformConfig {
                    transform_type,
                    fields: map,
                })
            }
        })
    }

    fn to_map(&self) -> Fields {
        match self {
            NodeConfig::Trigger(c) => {
                let mut map = c.settings.clone();
                if let Some(t) = c.trigger_type {
                    map.insert("triggerType".into(), t.as_str().into());
                }
                map
            }
            NodeConfig::Action(c) => {
                let mut map = c.fields.clone();
                if let Some(t) = &c.action_type {
                    map.insert("actionType".into(), t.clone().into());
                }
                if let Some(id) = &c.integration_id {
                    map.insert("integrationId".into(), id.clone().into());
                }
                map
            }
            NodeConfig::Condition(c) => {
                let mut map = Fields::new();
                if let Some(expr) = &c.condition {
                    map.insert("condition".into(), expr.clone().into());
                }
                map
            }
            NodeConfig::Transform(c) => {
                let mut map = c.fields.clone();
                if let Some(t) = &c.transform_type {
                    map.insert("transformType".into(), t.clone().into());
                }
                map
            }
        }
    }
}

/// How a node with several incoming edges decides whether to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// Run if any incoming edge is live.
    #[default]
    Any,
    /// Run only if every incoming edge is live.
    All,
}

/// Retry policy for action execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.max(1.0).powi(exp);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5000,
        }
    }
}

/// Node specification in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub config: NodeConfig,
    pub retry: Option<RetryPolicy>,
    pub join: Option<JoinMode>,
}

impl Node {
    fn with_config(id: impl Into<NodeId>, label: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            config,
            retry: None,
            join: None,
        }
    }

    pub fn trigger(id: impl Into<NodeId>, label: impl Into<String>, trigger_type: TriggerType) -> Self {
        Self::with_config(
            id,
            label,
            NodeConfig::Trigger(TriggerConfig {
                trigger_type: Some(trigger_type),
                settings: Fields::new(),
            }),
        )
    }

    pub fn action(id: impl Into<NodeId>, label: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self::with_config(
            id,
            label,
            NodeConfig::Action(ActionConfig {
                action_type: Some(action_type.into()),
                ..ActionConfig::default()
            }),
        )
    }

    pub fn condition(id: impl Into<NodeId>, label: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::with_config(
            id,
            label,
            NodeConfig::Condition(ConditionConfig {
                condition: Some(expression.into()),
            }),
        )
    }

    pub fn transform(id: impl Into<NodeId>, label: impl Into<String>, transform_type: impl Into<String>) -> Self {
        Self::with_config(
            id,
            label,
            NodeConfig::Transform(TransformConfig {
                transform_type: Some(transform_type.into()),
                fields: Fields::new(),
            }),
        )
    }

    /// Set a config field. Ignored for condition nodes, whose only field is
    /// the expression.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let (key, value) = (key.into(), value.into());
        match &mut self.config {
            NodeConfig::Trigger(c) => {
                c.settings.insert(key, value);
            }
            NodeConfig::Action(c) => {
                c.fields.insert(key, value);
            }
            NodeConfig::Transform(c) => {
                c.fields.insert(key, value);
            }
            NodeConfig::Condition(_) => {}
        }
        self
    }

    pub fn with_integration(mut self, integration_id: impl Into<String>) -> Self {
        if let NodeConfig::Action(c) = &mut self.config {
            c.integration_id = Some(integration_id.into());
        }
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_join(mut self, join: JoinMode) -> Self {
        self.join = Some(join);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    pub fn is_trigger(&self) -> bool {
        self.kind() == NodeKind::Trigger
    }

    pub fn action_type(&self) -> Option<&str> {
        match &self.config {
            NodeConfig::Action(c) => c.action_type.as_deref(),
            _ => None,
        }
    }
}

/// Wire shape of a node: `{id, type, label, config, retry?, join?}`.
/// Graphs saved by the editor nest `label`, `type` and `config` under
/// `data`; those are read when the top-level fields are absent.
#[derive(Serialize, Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type", alias = "kind", default)]
    kind: Option<NodeKind>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    config: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join: Option<JoinMode>,
    #[serde(default, skip_serializing)]
    data: Option<NodeData>,
}

#[derive(Default, Deserialize)]
struct NodeData {
    #[serde(default)]
    label: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<NodeKind>,
    #[serde(default)]
    config: Option<Fields>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let data = raw.data.unwrap_or_default();
        let kind = raw
            .kind
            .or(data.kind)
            .ok_or_else(|| format!("node '{}': missing node type", raw.id))?;
        let label = match (raw.label.is_empty(), data.label) {
            (true, Some(label)) => label,
            _ => raw.label,
        };
        let fields = raw.config.or(data.config).unwrap_or_default();
        let config = NodeConfig::from_map(kind, fields).map_err(|e| format!("node '{}': {}", raw.id, e))?;
        Ok(Node {
            id: raw.id,
            label,
            config,
            retry: raw.retry,
            join: raw.join,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        RawNode {
            kind: Some(node.kind()),
            config: Some(node.config.to_map()),
            id: node.id,
            label: node.label,
            retry: node.retry,
            join: node.join,
            data: None,
        }
    }
}

/// Per-run lifecycle of a node. Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failed | NodeStatus::Skipped)
    }
}

/// Output produced once a node succeeds in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    pub node_id: NodeId,
    pub label: String,
    pub fields: Fields,
}

impl NodeOutput {
    pub fn new(node_id: impl Into<NodeId>, label: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            label: label.into(),
            fields: Fields::new(),
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field, descending into nested objects for dotted paths.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.fields.get(head)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }
}
