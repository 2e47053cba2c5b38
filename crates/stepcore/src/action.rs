use crate::{ActionError, Fields, Value};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// Secret material for one integration, keyed by environment-variable name.
pub type Credentials = HashMap<String, String>;

/// What an action hands back: named output fields or a failure.
pub type ActionResult = Result<Fields, ActionError>;

/// Core trait that every executable action implements
///
/// Implementations receive their config with every template already
/// substituted. Transport and validation failures are converted into an
/// `ActionError` here, at the action's own boundary.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, config: &Fields, credentials: &Credentials) -> ActionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Json,
    Any,
}

impl FieldType {
    /// Whether a literal config value fits this type. Strings always fit,
    /// since they may hold template references resolved at run time.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::String(_)) | (FieldType::Any, _) | (FieldType::Json, _) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

/// One entry of an action's config schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigField {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl ConfigField {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            required: true,
            field_type,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            required: false,
            field_type,
        }
    }
}

/// Lookup used by structural validation to check action nodes for
/// completeness.
pub trait ActionCatalog {
    /// Config schema of the action, or `None` if the identifier is unknown.
    fn config_schema(&self, action_type: &str) -> Option<Vec<ConfigField>>;
}

impl ActionCatalog for HashMap<String, Vec<ConfigField>> {
    fn config_schema(&self, action_type: &str) -> Option<Vec<ConfigField>> {
        self.get(action_type).cloned()
    }
}
