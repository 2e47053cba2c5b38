use crate::common::{json_response, require_credential, require_str, transport, trim_base};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use stepcore::{Action, ActionError, ActionResult, ConfigField, Credentials, FieldType, Fields, Value};
use stepruntime::{ActionDescriptor, IntegrationInfo};
use tracing::info;

pub const SEND_MESSAGE: &str = "slack/send-message";

const API_KEY: &str = "SLACK_API_KEY";

/// Post a message with `chat.postMessage`
pub struct SendMessageAction {
    client: reqwest::Client,
    base_url: String,
}

impl SendMessageAction {
    pub fn new() -> Self {
        Self::with_base_url("https://slack.com/api")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url),
        }
    }
}

impl Default for SendMessageAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for SendMessageAction {
    async fn execute(&self, config: &Fields, credentials: &Credentials) -> ActionResult {
        let token = require_credential(credentials, API_KEY)?;
        let channel = require_str(config, "slackChannel")?;
        let text = require_str(config, "slackMessage")?;

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
            .map_err(transport)?;
        let body = json_response(response).await?;

        // Slack reports API errors with a 200 and `ok: false`.
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let error = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
            return Err(ActionError::Failed(format!("Failed to send Slack message: {}", error)));
        }

        let ts = body.get("ts").and_then(|v| v.as_str()).unwrap_or_default();
        let channel = body.get("channel").and_then(|v| v.as_str()).unwrap_or(channel);
        info!("Slack message {} posted to {}", ts, channel);

        Ok(Fields::from([
            ("ts".to_string(), Value::from(ts)),
            ("channel".to_string(), Value::from(channel)),
        ]))
    }
}

pub(crate) fn integration() -> IntegrationInfo {
    IntegrationInfo::new("slack", "Slack")
        .with_description("Send messages to Slack channels")
        .with_dependency("@slack/web-api", "^7.12.0")
        .with_env_var(API_KEY, "Slack bot token")
}

pub(crate) fn actions() -> Vec<ActionDescriptor> {
    vec![
        ActionDescriptor::new(SEND_MESSAGE, "Send Slack Message", Arc::new(SendMessageAction::new()))
            .with_description("Send a message to a Slack channel")
            .with_field(ConfigField::required("slackChannel", FieldType::String))
            .with_field(ConfigField::required("slackMessage", FieldType::String))
            .with_credential(API_KEY)
            .with_outputs(["ts", "channel"])
            .with_source("sendSlackMessageStep", include_str!("../templates/send-slack-message.ts")),
    ]
}
