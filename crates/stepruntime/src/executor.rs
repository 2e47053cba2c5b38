use crate::config::RuntimeConfig;
use crate::credentials::CredentialSource;
use crate::plan::ExecutionPlan;
use crate::registry::{ActionDescriptor, ActionRegistry};
use crate::run::{ExecutionRun, NodeFailure, NodeTrace, RunStatus};
use crate::transform;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use stepcore::expr::{self, Scope};
use stepcore::{
    template, validate_structure, ActionError, Branch, ConditionConfig, EventBus, ExecutionEvent,
    Fields, FlowError, Graph, JoinMode, NodeConfig, NodeId, NodeOutput, NodeStatus, RetryPolicy,
    RunId, TransformConfig, Value,
};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Executes validated graphs, running independent actions concurrently
pub struct WorkflowExecutor {
    registry: Arc<ActionRegistry>,
    credentials: Arc<dyn CredentialSource>,
    event_bus: EventBus,
    config: RuntimeConfig,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        credentials: Arc<dyn CredentialSource>,
        event_bus: EventBus,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            credentials,
            event_bus,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and run `graph` to completion.
    ///
    /// `payload` becomes the trigger's output. An empty payload falls back to
    /// the trigger's stored `mockRequest`, if it has one.
    pub async fn execute(
        &self,
        graph: &Graph,
        payload: Fields,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Result<ExecutionRun, FlowError> {
        validate_structure(graph, self.registry.as_ref())?;
        let plan = ExecutionPlan::build(graph)?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let trigger = plan.trigger();
        let trigger_node = &graph.nodes[trigger];

        self.event_bus.emit(ExecutionEvent::RunStarted {
            run_id,
            trigger_id: trigger_node.id.clone(),
            node_count: graph.nodes.len(),
            timestamp: started_at,
        });
        tracing::info!(%run_id, nodes = graph.nodes.len(), "Starting run");

        let payload = match (&trigger_node.config, payload.is_empty()) {
            (NodeConfig::Trigger(c), true) => c.mock_payload().unwrap_or_default(),
            _ => payload,
        };

        let mut state = RunState::new(run_id, graph, &plan, &self.event_bus, self.config.fan_in);
        state.start(trigger);
        state.succeed(trigger, payload.clone(), 1, None);

        let max_parallel = self.config.max_parallel_nodes.max(1);
        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut running = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            queue.extend(state.settle());

            let mut failed_inline = false;
            while running.len() < max_parallel {
                let Some(node) = queue.pop_front() else {
                    break;
                };
                match self.prepare_action(&mut state, node) {
                    Some(job) => {
                        let handle = tokio::spawn(job.run());
                        running.push(async move { (node, handle.await) });
                    }
                    None => failed_inline = true,
                }
            }
            if failed_inline {
                continue;
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some((node, joined)) = running.next() => match joined {
                    Ok((attempts, Ok(fields))) => state.succeed(node, fields, attempts, None),
                    Ok((attempts, Err(failure))) => state.fail(node, failure, attempts),
                    Err(e) => state.fail(node, NodeFailure::Panicked(e.to_string()), 0),
                },
            }
        }

        // In-flight tasks are detached here: they finish their current call,
        // and the result goes nowhere.
        drop(running);

        if cancelled {
            tracing::warn!(%run_id, "Run cancelled");
            self.event_bus.emit(ExecutionEvent::RunCancelled {
                run_id,
                timestamp: Utc::now(),
            });
        }
        state.skip_remaining();

        let status = if plan.sinks().iter().any(|&s| state.traces[s].status == NodeStatus::Success) {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        let duration_ms = clock.elapsed().as_millis() as u64;

        let run = ExecutionRun {
            run_id,
            graph: graph.clone(),
            trigger_payload: payload,
            nodes: state.traces,
            outputs: state.outputs,
            status,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        };

        self.event_bus.emit(ExecutionEvent::RunCompleted {
            run_id,
            success: run.is_success(),
            failed: run.failed_nodes(),
            skipped: run.skipped_nodes(),
            duration_ms,
            timestamp: run.finished_at,
        });
        tracing::info!(%run_id, ?status, duration_ms, "Run finished");

        Ok(run)
    }

    /// Resolve an action node's config and package the call. Resolution
    /// failures end the node here without touching the action.
    fn prepare_action(&self, state: &mut RunState<'_>, node: usize) -> Option<ActionJob> {
        let graph = state.graph;
        let spec = &graph.nodes[node];
        let NodeConfig::Action(action) = &spec.config else {
            state.skip(node);
            return None;
        };
        state.start(node);

        let action_type = action.action_type.as_deref().unwrap_or_default();
        let Some(descriptor) = self.registry.resolve(action_type) else {
            state.fail(node, NodeFailure::UnknownAction(action_type.to_string()), 0);
            return None;
        };

        let visible = state.visible_outputs(node);
        let config = match template::resolve_fields(&action.fields, &visible) {
            Ok(config) => config,
            Err(e) => {
                state.fail(node, e.into(), 0);
                return None;
            }
        };
        state.traces[node].resolved_config = Some(config.clone());

        let integration_id = action
            .integration_id
            .clone()
            .unwrap_or_else(|| descriptor.integration().to_string());
        tracing::debug!(node = %spec.id, action = %descriptor.id, "Dispatching action");

        Some(ActionJob {
            run_id: state.run_id,
            node_id: spec.id.clone(),
            descriptor,
            integration_id,
            config,
            credentials: self.credentials.clone(),
            retry: spec.retry.clone().unwrap_or_else(|| self.config.retry.clone()),
            timeout_ms: self.config.node_timeout_ms,
            event_bus: self.event_bus.clone(),
        })
    }
}

/// One action invocation, owned so it can move onto a task
struct ActionJob {
    run_id: RunId,
    node_id: NodeId,
    descriptor: Arc<ActionDescriptor>,
    integration_id: String,
    config: Fields,
    credentials: Arc<dyn CredentialSource>,
    retry: RetryPolicy,
    timeout_ms: Option<u64>,
    event_bus: EventBus,
}

impl ActionJob {
    /// Attempt the call until it succeeds, fails for good, or the retry
    /// budget runs out. Every attempt sees the same resolved config.
    async fn run(self) -> (u32, Result<Fields, NodeFailure>) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt().await {
                Ok(fields) => return (attempt, Ok(fields)),
                Err(failure) if failure.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        node = %self.node_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Action failed, retrying"
                    );
                    self.event_bus.emit(ExecutionEvent::NodeRetrying {
                        run_id: self.run_id,
                        node_id: self.node_id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: failure.to_string(),
                        timestamp: Utc::now(),
                    });
                    sleep(delay).await;
                }
                Err(failure) => return (attempt, Err(failure)),
            }
        }
    }

    /// Credentials are fetched for this call only and dropped with it.
    async fn attempt(&self) -> Result<Fields, NodeFailure> {
        let credentials = self
            .credentials
            .fetch(&self.integration_id, &self.descriptor.credential_keys)
            .await?;
        let call = self.descriptor.executor.execute(&self.config, &credentials);
        let result = match self.timeout_ms {
            Some(ms) => timeout(Duration::from_millis(ms), call)
                .await
                .unwrap_or(Err(ActionError::Timeout { ms })),
            None => call.await,
        };
        Ok(result?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Undecided,
    Live,
    Dead,
}

/// Mutable per-run bookkeeping. Only the scheduling loop touches it, so an
/// output is always published before any successor is looked at.
struct RunState<'g> {
    run_id: RunId,
    graph: &'g Graph,
    plan: &'g ExecutionPlan,
    event_bus: &'g EventBus,
    fan_in: JoinMode,
    traces: Vec<NodeTrace>,
    edges: Vec<EdgeState>,
    outputs: HashMap<NodeId, Arc<NodeOutput>>,
    queued: Vec<bool>,
}

impl<'g> RunState<'g> {
    fn new(
        run_id: RunId,
        graph: &'g Graph,
        plan: &'g ExecutionPlan,
        event_bus: &'g EventBus,
        fan_in: JoinMode,
    ) -> Self {
        Self {
            run_id,
            graph,
            plan,
            event_bus,
            fan_in,
            traces: graph.nodes.iter().map(|n| NodeTrace::pending(&n.id, &n.label)).collect(),
            edges: vec![EdgeState::Undecided; graph.edges.len()],
            outputs: HashMap::new(),
            queued: vec![false; graph.nodes.len()],
        }
    }

    fn start(&mut self, node: usize) {
        let spec = &self.graph.nodes[node];
        self.traces[node].start();
        tracing::debug!(node = %spec.id, "Node started");
        self.event_bus.emit(ExecutionEvent::NodeStarted {
            run_id: self.run_id,
            node_id: spec.id.clone(),
            label: spec.label.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Publish the output, then decide outgoing edges. `branch` is the
    /// outcome of a condition node.
    fn succeed(&mut self, node: usize, fields: Fields, attempts: u32, branch: Option<bool>) {
        if self.traces[node].status.is_terminal() {
            return;
        }
        let graph = self.graph;
        let spec = &graph.nodes[node];
        self.outputs.insert(
            spec.id.clone(),
            Arc::new(NodeOutput::new(spec.id.clone(), spec.label.clone()).with_fields(fields)),
        );

        let trace = &mut self.traces[node];
        trace.attempts = attempts;
        trace.finish(NodeStatus::Success);
        let duration_ms = trace.duration_ms.unwrap_or(0);
        tracing::info!(node = %spec.id, attempts, duration_ms, "Node completed");
        self.event_bus.emit(ExecutionEvent::NodeCompleted {
            run_id: self.run_id,
            node_id: spec.id.clone(),
            attempts,
            duration_ms,
            timestamp: Utc::now(),
        });

        for &e in self.plan.outgoing(node) {
            let live = match branch {
                Some(outcome) => graph.edges[e].branch.unwrap_or(Branch::True).matches(outcome),
                None => true,
            };
            self.edges[e] = if live { EdgeState::Live } else { EdgeState::Dead };
        }
    }

    fn fail(&mut self, node: usize, failure: NodeFailure, attempts: u32) {
        let graph = self.graph;
        let trace = &mut self.traces[node];
        if trace.status.is_terminal() {
            return;
        }
        let spec = &graph.nodes[node];
        tracing::error!(node = %spec.id, attempts, error = %failure, "Node failed");
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            run_id: self.run_id,
            node_id: spec.id.clone(),
            error: failure.to_string(),
            attempts,
            timestamp: Utc::now(),
        });
        trace.attempts = attempts;
        trace.error = Some(failure);
        trace.finish(NodeStatus::Failed);
        self.kill_outgoing(node);
    }

    fn skip(&mut self, node: usize) {
        if !self.traces[node].finish(NodeStatus::Skipped) {
            return;
        }
        let spec = &self.graph.nodes[node];
        tracing::debug!(node = %spec.id, "Node skipped");
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: spec.id.clone(),
            timestamp: Utc::now(),
        });
        self.kill_outgoing(node);
    }

    fn kill_outgoing(&mut self, node: usize) {
        for &e in self.plan.outgoing(node) {
            self.edges[e] = EdgeState::Dead;
        }
    }

    fn skip_remaining(&mut self) {
        for node in 0..self.traces.len() {
            if !self.traces[node].status.is_terminal() {
                self.skip(node);
            }
        }
    }

    /// Outputs of `node`'s ancestors. Template references never see
    /// anything else, whatever order concurrent siblings finished in.
    fn visible_outputs(&self, node: usize) -> HashMap<String, Arc<NodeOutput>> {
        self.plan
            .ancestors(node)
            .iter()
            .filter_map(|&a| {
                let id = &self.graph.nodes[a].id;
                self.outputs.get(id).map(|o| (id.clone(), o.clone()))
            })
            .collect()
    }

    /// Outputs feeding `node` over live edges, in edge order.
    fn live_upstream(&self, node: usize) -> Vec<Arc<NodeOutput>> {
        let mut upstream: Vec<Arc<NodeOutput>> = Vec::new();
        for &e in self.plan.incoming(node) {
            if self.edges[e] != EdgeState::Live {
                continue;
            }
            if let Some(output) = self.outputs.get(&self.graph.edges[e].source) {
                if !upstream.iter().any(|o| o.node_id == output.node_id) {
                    upstream.push(output.clone());
                }
            }
        }
        upstream
    }

    /// Decide every pending node whose incoming edges are all decided.
    /// Conditions and transforms run on the spot; the returned actions are
    /// ready to be dispatched.
    fn settle(&mut self) -> Vec<usize> {
        let (graph, plan) = (self.graph, self.plan);
        let mut ready = Vec::new();
        loop {
            let mut progressed = false;
            for &node in plan.order() {
                if self.queued[node] || self.traces[node].status != NodeStatus::Pending {
                    continue;
                }
                let incoming = plan.incoming(node);
                if incoming.iter().any(|&e| self.edges[e] == EdgeState::Undecided) {
                    continue;
                }
                progressed = true;

                let live = incoming.iter().filter(|&&e| self.edges[e] == EdgeState::Live).count();
                let spec = &graph.nodes[node];
                let runs = match spec.join.unwrap_or(self.fan_in) {
                    JoinMode::Any => live > 0,
                    JoinMode::All => live > 0 && live == incoming.len(),
                };
                if !runs {
                    self.skip(node);
                    continue;
                }

                match &spec.config {
                    NodeConfig::Action(_) => {
                        self.queued[node] = true;
                        ready.push(node);
                    }
                    NodeConfig::Condition(c) => self.run_condition(node, c),
                    NodeConfig::Transform(c) => self.run_transform(node, c),
                    NodeConfig::Trigger(_) => self.skip(node),
                }
            }
            if !progressed {
                return ready;
            }
        }
    }

    fn run_condition(&mut self, node: usize, config: &ConditionConfig) {
        self.start(node);
        let source = config.condition.as_deref().unwrap_or_default();
        let visible = self.visible_outputs(node);
        let upstream = self.live_upstream(node);
        let scope = Scope {
            outputs: &visible,
            locals: upstream.iter().map(|o| o.as_ref()).collect(),
        };
        match expr::evaluate_condition(source, &scope) {
            Ok(outcome) => {
                tracing::debug!(node = %self.graph.nodes[node].id, outcome, "Condition evaluated");
                let fields = Fields::from([("result".to_string(), Value::Bool(outcome))]);
                self.succeed(node, fields, 1, Some(outcome));
            }
            Err(e) => self.fail(node, e.into(), 1),
        }
    }

    fn run_transform(&mut self, node: usize, config: &TransformConfig) {
        self.start(node);
        let visible = self.visible_outputs(node);
        let upstream = self.live_upstream(node);
        let upstream: Vec<&NodeOutput> = upstream.iter().map(|o| o.as_ref()).collect();
        match transform::apply(config, &visible, &upstream) {
            Ok(fields) => self.succeed(node, fields, 1, None),
            Err(failure) => self.fail(node, failure, 1),
        }
    }
}
