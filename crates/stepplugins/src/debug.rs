use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use stepcore::{Action, ActionResult, ConfigField, Credentials, FieldType, Fields, Value};
use stepruntime::{ActionDescriptor, IntegrationInfo};
use tracing::{debug, info};

pub const LOG: &str = "debug/log";

/// Logs its resolved config and echoes the message back
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    async fn execute(&self, config: &Fields, _credentials: &Credentials) -> ActionResult {
        let message = config
            .get("message")
            .map(Value::to_template_string)
            .unwrap_or_else(|| "(no message)".to_string());

        info!("DEBUG: {}", message);
        for (key, value) in config.iter().filter(|(k, _)| k.as_str() != "message") {
            debug!("  {}: {}", key, value);
        }

        Ok(Fields::from([
            ("message".to_string(), Value::from(message)),
            ("loggedAt".to_string(), Value::from(Utc::now().to_rfc3339())),
        ]))
    }
}

pub(crate) fn integration() -> IntegrationInfo {
    IntegrationInfo::new("debug", "Debug").with_description("Inspect data flowing through a workflow")
}

pub(crate) fn actions() -> Vec<ActionDescriptor> {
    vec![ActionDescriptor::new(LOG, "Log", Arc::new(LogAction))
        .with_description("Log a message and pass it on")
        .with_field(ConfigField::optional("message", FieldType::Any))
        .with_outputs(["message", "loggedAt"])
        .with_source("logStep", include_str!("../templates/log.ts"))]
}
