//! Core abstractions for the step flow runtime
//!
//! This crate provides the graph model, structural validation, the template
//! and condition languages, and the action contract shared by the execution
//! engine and the source compiler.

mod action;
mod error;
pub mod events;
pub mod expr;
mod graph;
mod node;
pub mod template;
mod transform;
mod validate;
mod value;

pub use action::{Action, ActionCatalog, ActionResult, ConfigField, Credentials, FieldType};
pub use error::{
    ActionError, CredentialError, FlowError, ResolutionError, StructuralError, StructuralErrorKind,
};
pub use events::*;
pub use graph::{Branch, Edge, Graph};
pub use node::{
    ActionConfig, ConditionConfig, Fields, JoinMode, Node, NodeConfig, NodeId, NodeKind,
    NodeOutput, NodeStatus, RetryPolicy, TransformConfig, TriggerConfig, TriggerType,
};
pub use transform::TransformKind;
pub use validate::{repair_triggers, validate_structure, TriggerRepair};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
