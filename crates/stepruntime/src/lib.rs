//! Workflow execution runtime
//!
//! This crate provides the action registry integrations register into, the
//! execution engine that walks a validated graph with bounded parallelism,
//! and the runtime facade the CLI and server drive.

mod config;
mod credentials;
mod executor;
mod loader;
mod plan;
pub mod registry;
mod run;
mod runtime;
mod transform;

pub use config::{ConfigError, RuntimeConfig};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use executor::WorkflowExecutor;
pub use loader::{load_graph, GraphLoader};
pub use plan::ExecutionPlan;
pub use registry::{parse_action_id, ActionDescriptor, ActionRegistry, EnvVar, IntegrationInfo, RegistryError};
pub use run::{ExecutionRun, NodeFailure, NodeTrace, RunStatus};
pub use runtime::{FlowRuntime, RunHandle};
pub use transform::apply as apply_transform;
