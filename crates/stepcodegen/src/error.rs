use stepcore::{NodeId, ResolutionError, StructuralError};
use thiserror::Error;

/// Why a graph could not be lowered. Compilation stops at the first error
/// and never returns partial source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Graph rejected: {0}")]
    Structural(#[from] StructuralError),

    #[error("Node '{node_id}' uses unknown action '{action_type}'")]
    UnknownAction { node_id: NodeId, action_type: String },

    #[error("Node '{node_id}' declares unknown transform '{transform_type}'")]
    UnknownTransform { node_id: NodeId, transform_type: String },

    #[error("Node '{node_id}' has an invalid condition: {source}")]
    InvalidCondition {
        node_id: NodeId,
        #[source]
        source: ResolutionError,
    },

    #[error("Node '{node_id}' references '{target}', which does not exist")]
    UnresolvedReference { node_id: NodeId, target: NodeId },

    #[error("Node '{node_id}' references '{target}', which does not run before it")]
    NotAncestor { node_id: NodeId, target: NodeId },

    #[error("Node '{node_id}' reads '{field}' from '{target}', which never produces it")]
    MissingField {
        node_id: NodeId,
        target: NodeId,
        field: String,
    },

    #[error("Node '{node_id}' has a malformed template in '{key}': {source}")]
    MalformedTemplate {
        node_id: NodeId,
        key: String,
        #[source]
        source: ResolutionError,
    },

    #[error("Node '{node_id}' has invalid config for '{key}': {reason}")]
    InvalidConfig {
        node_id: NodeId,
        key: String,
        reason: String,
    },
}
