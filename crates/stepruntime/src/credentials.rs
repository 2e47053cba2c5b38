use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use stepcore::{CredentialError, Credentials};

/// External store the engine asks for secrets, once per node invocation.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Secrets for `integration_id`, restricted to `keys`. Missing keys are
    /// simply absent; the action decides whether that is fatal.
    async fn fetch(&self, integration_id: &str, keys: &[String]) -> Result<Credentials, CredentialError>;
}

/// Reads each key from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn fetch(&self, integration_id: &str, keys: &[String]) -> Result<Credentials, CredentialError> {
        let mut credentials = Credentials::new();
        for key in keys {
            match std::env::var(key) {
                Ok(value) if !value.is_empty() => {
                    credentials.insert(key.clone(), value);
                }
                _ => tracing::warn!(integration = integration_id, key = %key, "Credential not set"),
            }
        }
        Ok(credentials)
    }
}

/// Fixed in-memory credential sets keyed by integration id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    sets: HashMap<String, Credentials>,
    unavailable: HashSet<String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, integration_id: &str, key: &str, value: &str) -> Self {
        self.sets
            .entry(integration_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Make every fetch for `integration_id` fail.
    pub fn unavailable(mut self, integration_id: &str) -> Self {
        self.unavailable.insert(integration_id.to_string());
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self, integration_id: &str, keys: &[String]) -> Result<Credentials, CredentialError> {
        if self.unavailable.contains(integration_id) {
            return Err(CredentialError::Unavailable {
                integration_id: integration_id.to_string(),
                reason: "credential store refused the request".to_string(),
            });
        }
        let Some(set) = self.sets.get(integration_id) else {
            return Ok(Credentials::new());
        };
        Ok(set
            .iter()
            .filter(|(k, _)| keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
