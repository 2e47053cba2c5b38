use stepcore::{ActionError, Credentials, Fields, Value};

pub(crate) fn require_str<'a>(config: &'a Fields, field: &str) -> Result<&'a str, ActionError> {
    match config.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) | None | Some(Value::Null) => Err(ActionError::InvalidConfig {
            field: field.to_string(),
            reason: "is required".to_string(),
        }),
        Some(other) => Err(ActionError::InvalidConfig {
            field: field.to_string(),
            reason: format!("expected string, got {}", other.type_name()),
        }),
    }
}

/// Optional text field. Numbers and booleans are rendered, blanks are `None`.
pub(crate) fn optional_str(config: &Fields, field: &str) -> Option<String> {
    match config.get(field)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other.to_template_string()),
    }
}

pub(crate) fn require_credential<'a>(
    credentials: &'a Credentials,
    key: &str,
) -> Result<&'a str, ActionError> {
    credentials
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ActionError::MissingCredential(key.to_string()))
}

pub(crate) fn transport(err: reqwest::Error) -> ActionError {
    if err.is_timeout() {
        ActionError::Transport(format!("request timed out: {}", err))
    } else {
        ActionError::Transport(err.to_string())
    }
}

/// Turn a non-2xx response into `ActionError::Http`, otherwise parse the body as JSON.
pub(crate) async fn json_response(response: reqwest::Response) -> Result<serde_json::Value, ActionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ActionError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(transport)
}

pub(crate) fn trim_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}
