use crate::NodeId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which structural check rejected a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralErrorKind {
    TriggerCount,
    DuplicateNode,
    DanglingEdge,
    UnexpectedBranch,
    Cycle,
    IncompleteNode,
}

impl fmt::Display for StructuralErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructuralErrorKind::TriggerCount => "trigger count",
            StructuralErrorKind::DuplicateNode => "duplicate node",
            StructuralErrorKind::DanglingEdge => "dangling edge",
            StructuralErrorKind::UnexpectedBranch => "unexpected branch",
            StructuralErrorKind::Cycle => "cycle",
            StructuralErrorKind::IncompleteNode => "incomplete node",
        };
        f.write_str(name)
    }
}

/// A graph failed validation. Always fatal to the run or compile that asked.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind}: {reason}")]
pub struct StructuralError {
    pub kind: StructuralErrorKind,
    pub reason: String,
    pub node_ids: Vec<NodeId>,
    pub edge_ids: Vec<String>,
}

impl StructuralError {
    pub fn new(kind: StructuralErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            node_ids: Vec::new(),
            edge_ids: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.node_ids.extend(ids);
        self
    }

    pub fn with_edges(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.edge_ids.extend(ids);
        self
    }
}

/// A template reference or condition expression could not be evaluated.
///
/// Deterministic: retrying the node can never change the outcome.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    #[error("unresolved reference to node '{node_id}' (field '{field}')")]
    UnresolvedReference { node_id: NodeId, field: String },

    #[error("output of node '{node_id}' has no field '{field}'")]
    MissingField { node_id: NodeId, field: String },

    #[error("malformed template token '{token}'")]
    MalformedToken { token: String },

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("expression '{expression}' produced {found}, expected a boolean")]
    NotBoolean { expression: String, found: String },
}

/// Failure reported by an action (or a transform) at its own boundary.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("{0} is not configured")]
    MissingCredential(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl ActionError {
    /// Configuration and credential problems are deterministic, so the engine
    /// does not spend retry attempts on them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::MissingCredential(_) | ActionError::InvalidConfig { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum CredentialError {
    #[error("credentials for '{integration_id}' unavailable: {reason}")]
    Unavailable {
        integration_id: String,
        reason: String,
    },
}
