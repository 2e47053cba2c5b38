use crate::common::{optional_str, require_str, transport};
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use stepcore::{Action, ActionError, ActionResult, ConfigField, Credentials, FieldType, Fields, Value};
use stepruntime::{ActionDescriptor, IntegrationInfo};
use tracing::debug;

pub const SEND_REQUEST: &str = "http/request";

/// Generic HTTP call
///
/// Config: `endpoint`, `httpMethod` (default GET), `httpHeaders` (object or
/// JSON text), `httpBody` (ignored for GET). JSON responses are parsed,
/// anything else is returned as text.
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(config: &Fields) -> Result<Method, ActionError> {
    let method = optional_str(config, "httpMethod").unwrap_or_else(|| "GET".to_string());
    Method::from_bytes(method.trim().to_uppercase().as_bytes()).map_err(|_| ActionError::InvalidConfig {
        field: "httpMethod".to_string(),
        reason: format!("unsupported method '{}'", method),
    })
}

fn parse_headers(config: &Fields) -> Result<Vec<(String, String)>, ActionError> {
    let invalid = |reason: String| ActionError::InvalidConfig {
        field: "httpHeaders".to_string(),
        reason,
    };
    let headers = match config.get("httpHeaders") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => {
            Value::from(serde_json::from_str::<serde_json::Value>(s).map_err(|e| invalid(e.to_string()))?)
        }
        Some(other) => other.clone(),
    };
    let map = headers
        .as_object()
        .ok_or_else(|| invalid(format!("expected object, got {}", headers.type_name())))?;
    Ok(map
        .iter()
        .map(|(k, v)| (k.clone(), v.to_template_string()))
        .collect())
}

/// Request body, or `None` when there is nothing worth sending. An empty
/// JSON object counts as nothing.
fn body(config: &Fields) -> Option<String> {
    match config.get("httpBody")? {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::String(s) => {
            let trimmed = s.trim();
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(serde_json::Value::Object(map)) if map.is_empty() => None,
                Ok(json) => Some(json.to_string()),
                Err(_) if trimmed.is_empty() => None,
                Err(_) => Some(s.clone()),
            }
        }
        other => Some(other.to_json().to_string()),
    }
}

#[async_trait]
impl Action for HttpRequestAction {
    async fn execute(&self, config: &Fields, _credentials: &Credentials) -> ActionResult {
        let endpoint = require_str(config, "endpoint")?;
        let method = parse_method(config)?;
        let headers = parse_headers(config)?;

        debug!("{} {}", method, endpoint);

        let mut request = self.client.request(method.clone(), endpoint);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if method != Method::GET {
            if let Some(body) = body(config) {
                request = request.body(body);
            }
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let text = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(ActionError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let data = if is_json {
            serde_json::from_str::<serde_json::Value>(&text)
                .map(Value::from)
                .unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(Fields::from([
            ("data".to_string(), data),
            ("status".to_string(), Value::from(status.as_u16() as i64)),
        ]))
    }
}

pub(crate) fn integration() -> IntegrationInfo {
    IntegrationInfo::new("http", "HTTP").with_description("Call any HTTP endpoint")
}

pub(crate) fn actions() -> Vec<ActionDescriptor> {
    vec![ActionDescriptor::new(SEND_REQUEST, "HTTP Request", Arc::new(HttpRequestAction::new()))
        .with_description("Make an HTTP request to any endpoint")
        .with_field(ConfigField::required("endpoint", FieldType::String))
        .with_field(ConfigField::optional("httpMethod", FieldType::String))
        .with_field(ConfigField::optional("httpHeaders", FieldType::Json))
        .with_field(ConfigField::optional("httpBody", FieldType::Json))
        .with_outputs(["data", "status"])
        .with_source("httpRequestStep", include_str!("../templates/http-request.ts"))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_accept_json_text() {
        let config = Fields::from([(
            "httpHeaders".to_string(),
            Value::from(r#"{"X-Token": "abc", "X-Count": 2}"#),
        )]);
        assert_eq!(
            parse_headers(&config).unwrap(),
            vec![
                ("X-Count".to_string(), "2".to_string()),
                ("X-Token".to_string(), "abc".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_object_body_is_dropped() {
        for raw in ["{}", "  ", "{ }"] {
            let config = Fields::from([("httpBody".to_string(), Value::from(raw))]);
            assert_eq!(body(&config), None, "{:?}", raw);
        }
        let config = Fields::from([("httpBody".to_string(), Value::from("plain text"))]);
        assert_eq!(body(&config).as_deref(), Some("plain text"));
    }

    #[test]
    fn test_bad_method_is_invalid_config() {
        let config = Fields::from([("httpMethod".to_string(), Value::from("GE T"))]);
        assert!(matches!(
            parse_method(&config),
            Err(ActionError::InvalidConfig { ref field, .. }) if field == "httpMethod"
        ));
    }
}
