use crate::config::RuntimeConfig;
use crate::credentials::{CredentialSource, EnvCredentials};
use crate::registry::ActionRegistry;
use crate::run::ExecutionRun;
use crate::WorkflowExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{
    validate_structure, EventBus, ExecutionEvent, Fields, FlowError, Graph, RunId, StructuralError,
};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to a run started with [`FlowRuntime::spawn`]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExecutionRun, FlowError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stop scheduling new work. Pending and running nodes end `Skipped`;
    /// an action already in flight completes but its result is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run, usable after the handle is joined.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<ExecutionRun, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(format!("Run task join error: {}", e)))?
    }
}

/// Main runtime for executing workflow graphs
pub struct FlowRuntime {
    registry: Arc<ActionRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: EventBus,
    config: RuntimeConfig,
    workflows: Arc<RwLock<HashMap<Uuid, Graph>>>,
}

impl FlowRuntime {
    /// Runtime with default settings, reading credentials from the
    /// environment
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<ActionRegistry>, config: RuntimeConfig) -> Self {
        Self::with_credentials(registry, config, Arc::new(EnvCredentials))
    }

    pub fn with_credentials(
        registry: Arc<ActionRegistry>,
        config: RuntimeConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let executor = Arc::new(WorkflowExecutor::new(
            registry.clone(),
            credentials,
            event_bus.clone(),
            config.clone(),
        ));

        Self {
            registry,
            executor,
            event_bus,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Structural validation against this runtime's registry.
    pub fn validate(&self, graph: &Graph) -> Result<(), StructuralError> {
        validate_structure(graph, self.registry.as_ref())
    }

    /// Execute a graph directly and wait for the run to finish
    pub async fn execute(&self, graph: &Graph, payload: Fields) -> Result<ExecutionRun, FlowError> {
        self.executor
            .execute(graph, payload, RunId::new_v4(), CancellationToken::new())
            .await
    }

    /// Start a run in the background.
    pub fn spawn(&self, graph: Graph, payload: Fields) -> RunHandle {
        let run_id = RunId::new_v4();
        let cancel = CancellationToken::new();
        let executor = self.executor.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { executor.execute(&graph, payload, run_id, token).await });

        RunHandle { run_id, cancel, task }
    }

    /// Store a graph for later runs, returning its id.
    pub async fn register_workflow(&self, graph: Graph) -> Uuid {
        let id = Uuid::new_v4();
        self.workflows.write().await.insert(id, graph);
        id
    }

    pub async fn get_workflow(&self, id: Uuid) -> Option<Graph> {
        self.workflows.read().await.get(&id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<(Uuid, Graph)> {
        let workflows = self.workflows.read().await;
        let mut list: Vec<(Uuid, Graph)> = workflows.iter().map(|(id, g)| (*id, g.clone())).collect();
        list.sort_by(|a, b| a.1.name.cmp(&b.1.name).then(a.0.cmp(&b.0)));
        list
    }

    /// Replace a stored graph. Runs already started keep their snapshot.
    pub async fn update_workflow(&self, id: Uuid, graph: Graph) -> Result<(), FlowError> {
        let mut workflows = self.workflows.write().await;
        let slot = workflows
            .get_mut(&id)
            .ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        *slot = graph;
        Ok(())
    }

    pub async fn remove_workflow(&self, id: Uuid) -> Option<Graph> {
        self.workflows.write().await.remove(&id)
    }

    /// Execute a stored graph by id
    pub async fn execute_workflow(&self, id: Uuid, payload: Fields) -> Result<ExecutionRun, FlowError> {
        let graph = self
            .get_workflow(id)
            .await
            .ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        self.execute(&graph, payload).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}
