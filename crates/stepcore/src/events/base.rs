use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        trigger_id: NodeId,
        node_count: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        failed: Vec<NodeId>,
        skipped: Vec<NodeId>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunCancelled {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        label: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        run_id: RunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeRetrying {
        run_id: RunId,
        node_id: NodeId,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for run events. Sending never fails a run, even with no
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
