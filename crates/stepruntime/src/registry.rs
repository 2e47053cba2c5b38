use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use stepcore::{Action, ActionCatalog, ConfigField};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("global action registry already initialized")]
    AlreadyInitialized,

    #[error("alias chain starting at '{0}' never reaches a registered action")]
    AliasLoop(String),

    #[error("action '{action}' belongs to unregistered integration '{integration}'")]
    UnknownIntegration { action: String, integration: String },
}

/// Split `"<integration>/<slug>"`. Anything else is not a canonical id.
pub fn parse_action_id(action_id: &str) -> Option<(&str, &str)> {
    let (integration, slug) = action_id.split_once('/')?;
    if integration.is_empty() || slug.is_empty() || slug.contains('/') {
        return None;
    }
    Some((integration, slug))
}

/// Environment variable an integration needs at run time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub description: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Integration-level metadata shared by all of its actions
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationInfo {
    pub id: String,
    pub label: String,
    pub description: String,
    /// Package name to version range, needed by compiled programs.
    pub dependencies: BTreeMap<String, String>,
    pub env_vars: Vec<EnvVar>,
}

impl IntegrationInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            dependencies: BTreeMap::new(),
            env_vars: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency(mut self, package: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.insert(package.into(), version.into());
        self
    }

    pub fn with_env_var(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.env_vars.push(EnvVar::new(name, description));
        self
    }
}

/// Everything the engine and the compiler know about one action
#[derive(Clone, Serialize)]
pub struct ActionDescriptor {
    /// Canonical `"<integration>/<slug>"` identifier.
    pub id: String,
    pub label: String,
    pub description: String,
    pub config_schema: Vec<ConfigField>,
    /// Names of the secrets the action reads, in environment-variable style.
    pub credential_keys: Vec<String>,
    /// Fields a successful call publishes. Empty means undeclared.
    pub output_fields: Vec<String>,
    /// Name of the exported function in `source_template`.
    pub step_function: String,
    /// Standalone source of the step, inlined by the compiler.
    #[serde(skip)]
    pub source_template: String,
    #[serde(skip)]
    pub executor: Arc<dyn Action>,
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("credential_keys", &self.credential_keys)
            .finish_non_exhaustive()
    }
}

impl ActionDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, executor: Arc<dyn Action>) -> Self {
        let id = id.into();
        let step_function = parse_action_id(&id)
            .map(|(_, slug)| camel_case(slug) + "Step")
            .unwrap_or_else(|| "step".to_string());
        Self {
            id,
            label: label.into(),
            description: String::new(),
            config_schema: Vec::new(),
            credential_keys: Vec::new(),
            output_fields: Vec::new(),
            step_function,
            source_template: String::new(),
            executor,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: ConfigField) -> Self {
        self.config_schema.push(field);
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>) -> Self {
        self.credential_keys.push(key.into());
        self
    }

    pub fn with_outputs<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, step_function: impl Into<String>, source: impl Into<String>) -> Self {
        self.step_function = step_function.into();
        self.source_template = source.into();
        self
    }

    /// The integration half of the id.
    pub fn integration(&self) -> &str {
        parse_action_id(&self.id).map(|(i, _)| i).unwrap_or(&self.id)
    }
}

fn camel_case(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut upper = false;
    for c in slug.chars() {
        if c == '-' || c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Identifiers saved by older graphs, mapped to their canonical id.
// "Database Query", "Generate Text" and "Generate Image" have no entry:
// those integrations are not built in, so the labels stay unknown actions.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("Send Email", "resend/send-email"),
    ("Send Slack Message", "slack/send-message"),
    ("Create Ticket", "linear/create-ticket"),
    ("Find Issues", "linear/find-issues"),
    ("HTTP Request", "http/request"),
    ("Log", "debug/log"),
];

/// Registry of available actions
#[derive(Debug)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<ActionDescriptor>>,
    integrations: HashMap<String, IntegrationInfo>,
    aliases: HashMap<String, String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            integrations: HashMap::new(),
            aliases: LEGACY_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }

    /// Register an action. Registering the same id again replaces it.
    pub fn register(&mut self, descriptor: ActionDescriptor) {
        let id = descriptor.id.clone();
        if self.actions.insert(id.clone(), Arc::new(descriptor)).is_some() {
            tracing::info!("Replaced action: {}", id);
        } else {
            tracing::info!("Registering action: {}", id);
        }
    }

    pub fn register_integration(&mut self, info: IntegrationInfo) {
        tracing::debug!("Registering integration: {}", info.id);
        self.integrations.insert(info.id.clone(), info);
    }

    /// Add or replace a legacy identifier.
    pub fn alias(&mut self, legacy: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(legacy.into(), target.into());
    }

    /// Look up an action by canonical id, then through the alias table,
    /// then by exact label.
    pub fn resolve(&self, action_id: &str) -> Option<Arc<ActionDescriptor>> {
        if let Some(found) = self.actions.get(action_id) {
            return Some(found.clone());
        }

        let mut current = action_id;
        for _ in 0..self.aliases.len() {
            let Some(next) = self.aliases.get(current) else {
                break;
            };
            if let Some(found) = self.actions.get(next.as_str()) {
                return Some(found.clone());
            }
            current = next;
        }
        if self.aliases.contains_key(current) {
            tracing::error!("Alias chain for '{}' does not terminate", action_id);
            return None;
        }

        let mut by_label: Vec<&Arc<ActionDescriptor>> =
            self.actions.values().filter(|a| a.label == action_id).collect();
        by_label.sort_by(|a, b| a.id.cmp(&b.id));
        by_label.first().map(|a| (*a).clone())
    }

    /// Canonical id an identifier resolves to.
    pub fn canonical_id(&self, action_id: &str) -> Option<String> {
        self.resolve(action_id).map(|a| a.id.clone())
    }

    /// Verify every alias eventually leaves the alias table and every action
    /// has integration metadata. Meant to run once after startup
    /// registration.
    pub fn check(&self) -> Result<(), RegistryError> {
        let mut legacy: Vec<&String> = self.aliases.keys().collect();
        legacy.sort();
        for start in legacy {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(next) = self.aliases.get(current) {
                if !seen.insert(current) {
                    return Err(RegistryError::AliasLoop(start.clone()));
                }
                current = next;
            }
        }
        for action in self.list_actions() {
            let integration = action.integration();
            if !self.integrations.contains_key(integration) {
                return Err(RegistryError::UnknownIntegration {
                    action: action.id.clone(),
                    integration: integration.to_string(),
                });
            }
        }
        Ok(())
    }

    /// All actions, sorted by id.
    pub fn list_actions(&self) -> Vec<Arc<ActionDescriptor>> {
        let mut actions: Vec<_> = self.actions.values().cloned().collect();
        actions.sort_by(|a, b| a.id.cmp(&b.id));
        actions
    }

    /// All integrations, sorted by id.
    pub fn integrations(&self) -> Vec<&IntegrationInfo> {
        let mut integrations: Vec<_> = self.integrations.values().collect();
        integrations.sort_by(|a, b| a.id.cmp(&b.id));
        integrations
    }

    pub fn integration(&self, id: &str) -> Option<&IntegrationInfo> {
        self.integrations.get(id)
    }

    /// Integrations used by the given action identifiers, deduplicated and
    /// sorted. Unknown identifiers are ignored.
    fn integrations_for<'a>(&self, action_ids: impl IntoIterator<Item = &'a str>) -> Vec<&IntegrationInfo> {
        let mut ids: Vec<String> = action_ids
            .into_iter()
            .filter_map(|id| self.resolve(id))
            .map(|a| a.integration().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        ids.iter().filter_map(|id| self.integrations.get(id)).collect()
    }

    /// Union of package dependencies needed by the given actions.
    pub fn dependencies_for<'a>(
        &self,
        action_ids: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, String> {
        let mut deps = BTreeMap::new();
        for info in self.integrations_for(action_ids) {
            deps.extend(info.dependencies.clone());
        }
        deps
    }

    /// Environment variables needed by the given actions, first declaration
    /// wins for duplicate names.
    pub fn env_vars_for<'a>(&self, action_ids: impl IntoIterator<Item = &'a str>) -> Vec<EnvVar> {
        let mut vars: Vec<EnvVar> = Vec::new();
        for info in self.integrations_for(action_ids) {
            for var in &info.env_vars {
                if !vars.iter().any(|v| v.name == var.name) {
                    vars.push(var.clone());
                }
            }
        }
        vars
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCatalog for ActionRegistry {
    fn config_schema(&self, action_type: &str) -> Option<Vec<ConfigField>> {
        self.resolve(action_type).map(|a| a.config_schema.clone())
    }
}

static GLOBAL: OnceLock<Arc<ActionRegistry>> = OnceLock::new();

/// Build the process-wide registry. Integrations register inside `setup`;
/// the registry is read-only afterwards.
pub fn init<F>(setup: F) -> Result<Arc<ActionRegistry>, RegistryError>
where
    F: FnOnce(&mut ActionRegistry),
{
    if GLOBAL.get().is_some() {
        return Err(RegistryError::AlreadyInitialized);
    }
    let mut registry = ActionRegistry::new();
    setup(&mut registry);
    registry.check()?;
    let registry = Arc::new(registry);
    GLOBAL
        .set(registry.clone())
        .map_err(|_| RegistryError::AlreadyInitialized)?;
    tracing::info!("Action registry initialized with {} actions", registry.actions.len());
    Ok(registry)
}

/// The process-wide registry, if `init` has run.
pub fn global() -> Option<Arc<ActionRegistry>> {
    GLOBAL.get().cloned()
}
