use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{
    ActionError, CredentialError, Fields, Graph, NodeId, NodeOutput, NodeStatus, ResolutionError, RunId,
};
use thiserror::Error;

/// Why a node ended `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", content = "error", rename_all = "snake_case")]
pub enum NodeFailure {
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    Action(#[from] ActionError),

    #[error("{0}")]
    Credential(#[from] CredentialError),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl NodeFailure {
    /// Only failures of the call itself are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeFailure::Action(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Per-node entry of a run trace
#[derive(Debug, Clone, Serialize)]
pub struct NodeTrace {
    pub node_id: NodeId,
    pub label: String,
    pub status: NodeStatus,
    /// Number of times the action was invoked.
    pub attempts: u32,
    pub error: Option<NodeFailure>,
    /// Resolved config of the last attempt, for actions that got that far.
    pub resolved_config: Option<Fields>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl NodeTrace {
    pub(crate) fn pending(node_id: &str, label: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            label: label.to_string(),
            status: NodeStatus::Pending,
            attempts: 0,
            error: None,
            resolved_config: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Move to a terminal state. Terminal states never change again.
    pub(crate) fn finish(&mut self, status: NodeStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Failed,
}

/// One traversal of a graph: per-node trace, outputs and overall status
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRun {
    pub run_id: RunId,
    pub graph: Graph,
    pub trigger_payload: Fields,
    /// In graph node order.
    pub nodes: Vec<NodeTrace>,
    pub outputs: HashMap<NodeId, Arc<NodeOutput>>,
    pub status: RunStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRun {
    pub fn node(&self, node_id: &str) -> Option<&NodeTrace> {
        self.nodes.iter().find(|t| t.node_id == node_id)
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.node(node_id).map(|t| t.status)
    }

    pub fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.outputs.get(node_id).map(|o| o.as_ref())
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    fn ids_with(&self, status: NodeStatus) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.node_id.clone())
            .collect()
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.ids_with(NodeStatus::Failed)
    }

    pub fn skipped_nodes(&self) -> Vec<NodeId> {
        self.ids_with(NodeStatus::Skipped)
    }
}
