use serde::{Deserialize, Serialize};
use std::path::Path;
use stepcore::{JoinMode, RetryPolicy};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Per-attempt limit for a single action call.
    pub node_timeout_ms: Option<u64>,
    pub retry: RetryPolicy,
    /// Join mode for nodes that do not declare their own.
    pub fan_in: JoinMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            node_timeout_ms: None,
            retry: RetryPolicy::default(),
            fan_in: JoinMode::Any,
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file. `${VAR}` references are expanded from the
    /// environment before parsing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: RuntimeConfig = toml::from_str(&expanded)?;
        config.check()?;
        tracing::debug!(?config, "Loaded runtime config");
        Ok(config)
    }
}

impl RuntimeConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Replace `${VAR}` with the variable's value. Unset variables are left
/// as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match std::env::var(&name) {
                Ok(value) => result.push_str(&value),
                Err(_) => result.push_str(&format!("${{{}}}", name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
