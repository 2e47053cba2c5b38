use crate::common::{json_response, require_credential, require_str, transport, trim_base};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use stepcore::{Action, ActionResult, ConfigField, Credentials, FieldType, Fields, Value};
use stepruntime::{ActionDescriptor, IntegrationInfo};
use tracing::info;

pub const SEND_EMAIL: &str = "resend/send-email";

const API_KEY: &str = "RESEND_API_KEY";
const FROM_EMAIL: &str = "RESEND_FROM_EMAIL";

/// Send a plain-text email through the Resend API
pub struct SendEmailAction {
    client: reqwest::Client,
    base_url: String,
}

impl SendEmailAction {
    pub fn new() -> Self {
        Self::with_base_url("https://api.resend.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url),
        }
    }
}

impl Default for SendEmailAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for SendEmailAction {
    async fn execute(&self, config: &Fields, credentials: &Credentials) -> ActionResult {
        let api_key = require_credential(credentials, API_KEY)?;
        let from = require_credential(credentials, FROM_EMAIL)?;
        let to = require_str(config, "emailTo")?;
        let subject = require_str(config, "emailSubject")?;
        let text = config
            .get("emailBody")
            .map(Value::to_template_string)
            .unwrap_or_default();

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({ "from": from, "to": to, "subject": subject, "text": text }))
            .send()
            .await
            .map_err(transport)?;
        let body = json_response(response).await?;
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or_default();

        info!("Email {} sent to {}", id, to);
        Ok(Fields::from([("id".to_string(), Value::from(id))]))
    }
}

pub(crate) fn integration() -> IntegrationInfo {
    IntegrationInfo::new("resend", "Resend")
        .with_description("Send transactional emails")
        .with_dependency("resend", "^6.4.0")
        .with_env_var(API_KEY, "Resend API key for sending emails")
        .with_env_var(FROM_EMAIL, "Default sender email address")
}

pub(crate) fn actions() -> Vec<ActionDescriptor> {
    vec![ActionDescriptor::new(SEND_EMAIL, "Send Email", Arc::new(SendEmailAction::new()))
        .with_description("Send an email via Resend")
        .with_field(ConfigField::required("emailTo", FieldType::String))
        .with_field(ConfigField::required("emailSubject", FieldType::String))
        .with_field(ConfigField::optional("emailBody", FieldType::String))
        .with_credential(API_KEY)
        .with_credential(FROM_EMAIL)
        .with_outputs(["id"])
        .with_source("sendEmailStep", include_str!("../templates/send-email.ts"))]
}
