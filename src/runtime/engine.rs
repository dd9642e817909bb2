/// Dependency-gated graph execution engine
///
/// Walks a workflow graph depth-first from every start node, dispatching each
/// node to its handler once all of its upstream nodes have run. Node dispatch
/// inside one execution is strictly sequential; independent executions share
/// nothing but the read-only handler and workflow registries.

use crate::{
    config::EngineConfig,
    runtime::{
        condition,
        context::{
            CredentialResolver, ExecutionContext, ExecutionRequest, ExecutionResult, ExecutionStatus,
            NodeExecutionResult, NodeStatus,
        },
        error::EngineError,
        graph,
        handlers::{HandlerRegistry, NodeHandler},
    },
    workflow::{ErrorHandling, WorkflowDefinition, WorkflowEdge, WorkflowNode, WorkflowRegistry, WorkflowSettings},
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::instrument;

/// Graph execution engine
///
/// Cheap to share behind an `Arc`; holds no per-execution state.
pub struct ExecutionEngine {
    handlers: Arc<HandlerRegistry>,
    workflows: Arc<WorkflowRegistry>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    config: EngineConfig,
}

/// Why a single node invocation did not produce an output
enum InvocationFailure {
    Handler(String),
    Timeout,
}

/// State of one in-flight execution
struct Traversal<'a> {
    engine: &'a ExecutionEngine,
    workflow: &'a WorkflowDefinition,
    settings: WorkflowSettings,
    start_nodes: HashSet<String>,
    deadline: Option<Instant>,
    results: Vec<NodeExecutionResult>,
}

impl ExecutionEngine {
    /// Create new execution engine over shared registries
    pub fn new(handlers: Arc<HandlerRegistry>, workflows: Arc<WorkflowRegistry>, config: EngineConfig) -> Self {
        Self {
            handlers,
            workflows,
            credentials: None,
            config,
        }
    }

    /// Attach the credential store used for lazy credential resolution
    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(resolver);
        self
    }

    /// Register or replace a workflow definition (idempotent)
    pub fn register_workflow(&self, workflow: WorkflowDefinition) {
        self.workflows.register(workflow);
    }

    /// Shared workflow store
    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    /// Execute a registered workflow by id
    ///
    /// # Errors
    /// [`EngineError::WorkflowNotFound`] when the id is not registered. Every
    /// other failure is reported inside the returned envelope.
    pub async fn execute_registered(
        &self,
        workflow_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        Ok(self.execute(&workflow, request).await)
    }

    /// Execute a workflow and return the result envelope
    ///
    /// A failed execution still carries every node result recorded up to the
    /// failure, so callers can see exactly which node broke.
    #[instrument(skip(self, workflow, request), fields(workflow_id = %workflow.id, mode = %request.mode))]
    pub async fn execute(&self, workflow: &WorkflowDefinition, request: ExecutionRequest) -> ExecutionResult {
        let workflow_start_time = Instant::now();
        let settings = workflow.effective_settings();
        let deadline = settings
            .timeout_ms
            .map(|ms| workflow_start_time + Duration::from_millis(ms));
        let mut ctx = ExecutionContext::new(&workflow.id, request, self.credentials.clone());

        tracing::info!(
            "🚀 Starting workflow execution: {} ({} nodes, {} edges) execution_id={}",
            workflow.id,
            workflow.nodes.len(),
            workflow.edges.len(),
            ctx.execution_id
        );

        let mut traversal = Traversal {
            engine: self,
            workflow,
            settings,
            start_nodes: HashSet::new(),
            deadline,
            results: Vec::new(),
        };
        let outcome = traversal.run(&mut ctx).await;
        let mut results = traversal.results;
        let duration = workflow_start_time.elapsed();

        match outcome {
            Ok(()) => {
                let finished_at = Utc::now();
                for node in &workflow.nodes {
                    if !ctx.is_executed(&node.id) {
                        tracing::debug!("⏭️ Node '{}' was never reached", node.id);
                        results.push(NodeExecutionResult {
                            node_id: node.id.clone(),
                            status: NodeStatus::Skipped,
                            data: None,
                            error: None,
                            started_at: finished_at,
                            finished_at,
                        });
                    }
                }

                let output = final_output(workflow, &ctx);
                tracing::info!("🎉 Workflow '{}' execution completed successfully in {:?}", workflow.id, duration);
                ExecutionResult {
                    execution_id: ctx.execution_id,
                    status: ExecutionStatus::Success,
                    results,
                    output,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("❌ Workflow '{}' execution failed after {:?}: {}", workflow.id, duration, e);
                ExecutionResult {
                    execution_id: ctx.execution_id,
                    status: ExecutionStatus::Failed,
                    results,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("handlers", &self.handlers)
            .field("workflows", &self.workflows.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Output of the last node (declaration order) with no outgoing edges
fn final_output(workflow: &WorkflowDefinition, ctx: &ExecutionContext) -> Option<Value> {
    let sources: HashSet<&str> = workflow.edges.iter().map(|e| e.source.as_str()).collect();
    workflow
        .nodes
        .iter()
        .rev()
        .find(|n| !sources.contains(n.id.as_str()))
        .and_then(|n| ctx.output(&n.id).cloned())
}

impl<'a> Traversal<'a> {
    async fn run(&mut self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let plan = graph::plan(self.workflow)?;
        tracing::debug!("🎯 Start nodes: {:?}", plan.start_nodes);

        if let Some(input) = ctx.input.clone() {
            for node_id in &plan.start_nodes {
                ctx.seed_output(node_id, input.clone());
            }
        }
        self.start_nodes = plan.start_nodes.iter().cloned().collect();

        for start in &plan.start_nodes {
            self.traverse_from(ctx, start).await?;
        }
        Ok(())
    }

    /// Depth-first walk; children are visited in edge declaration order
    async fn traverse_from(&mut self, ctx: &mut ExecutionContext, start: &str) -> Result<(), EngineError> {
        let workflow = self.workflow;
        let mut stack = vec![start.to_string()];

        while let Some(node_id) = stack.pop() {
            if ctx.is_executed(&node_id) {
                continue;
            }
            let Some(node) = workflow.node(&node_id) else {
                continue;
            };
            if !self.dependencies_met(ctx, &node_id) {
                tracing::debug!("⏸️ Deferring node '{}' until all upstream nodes have run", node_id);
                continue;
            }

            self.execute_node(ctx, node).await?;

            let next: Vec<&WorkflowEdge> = workflow
                .outgoing_edges(&node_id)
                .filter(|edge| self.edge_passes(ctx, edge))
                .collect();
            for edge in next.into_iter().rev() {
                stack.push(edge.target.clone());
            }
        }
        Ok(())
    }

    fn dependencies_met(&self, ctx: &ExecutionContext, node_id: &str) -> bool {
        self.start_nodes.contains(node_id)
            || self.workflow.incoming_edges(node_id).all(|e| ctx.is_executed(&e.source))
    }

    fn edge_passes(&self, ctx: &ExecutionContext, edge: &WorkflowEdge) -> bool {
        match &edge.condition {
            None => true,
            Some(cond) => {
                let passed = condition::evaluate(cond, ctx.output(&edge.source));
                if !passed {
                    tracing::debug!(
                        "🚫 Edge '{}' ({} → {}) condition failed: {} {:?} {}",
                        edge.id,
                        edge.source,
                        edge.target,
                        cond.field,
                        cond.operator,
                        cond.value
                    );
                }
                passed
            }
        }
    }

    /// Gather the input for a node from its inbound edges
    ///
    /// Several inbound edges shallow-merge their sources' object outputs in
    /// declaration order; a non-object output is kept under its source's id.
    fn gather_input(&self, ctx: &ExecutionContext, node: &WorkflowNode) -> Value {
        let incoming: Vec<&WorkflowEdge> = self.workflow.incoming_edges(&node.id).collect();

        // A start node whose upstream has not run yet was entered on its own.
        if incoming.is_empty() || !incoming.iter().all(|e| ctx.is_executed(&e.source)) {
            return ctx.original_input();
        }

        if let [edge] = incoming.as_slice() {
            return ctx.output(&edge.source).cloned().unwrap_or(Value::Null);
        }

        let mut merged = Map::new();
        for edge in incoming {
            match ctx.output(&edge.source) {
                Some(Value::Object(fields)) => {
                    for (key, value) in fields {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Some(Value::Null) | None => {}
                Some(other) => {
                    merged.insert(edge.source.clone(), other.clone());
                }
            }
        }
        Value::Object(merged)
    }

    async fn execute_node(&mut self, ctx: &mut ExecutionContext, node: &WorkflowNode) -> Result<(), EngineError> {
        let input = self.gather_input(ctx, node);
        let started_at = Utc::now();
        let node_start_time = Instant::now();

        tracing::info!("📍 Executing node '{}' (type: {:?})", node.id, node.node_type);

        let Some(handler) = self.engine.handlers.get(node.node_type) else {
            let err = EngineError::HandlerNotFound {
                node_id: node.id.clone(),
                node_type: node.node_type,
            };
            self.record_error(node, err.to_string(), started_at);
            return Err(err);
        };

        let outcome = self.invoke(handler.as_ref(), node, &input, ctx).await;
        ctx.mark_executed(&node.id);

        match outcome {
            Ok(output) => {
                tracing::info!("✅ Node '{}' completed in {:?}", node.id, node_start_time.elapsed());
                ctx.record_output(&node.id, output.clone());
                self.results.push(NodeExecutionResult {
                    node_id: node.id.clone(),
                    status: NodeStatus::Success,
                    data: Some(output),
                    error: None,
                    started_at,
                    finished_at: Utc::now(),
                });
                Ok(())
            }
            Err(InvocationFailure::Timeout) => {
                let budget = Duration::from_millis(self.settings.timeout_ms.unwrap_or_default());
                self.record_error(node, format!("node timed out after workflow budget of {:?}", budget), started_at);
                Err(EngineError::Timeout(budget))
            }
            Err(InvocationFailure::Handler(message)) => {
                self.record_error(node, message.clone(), started_at);
                if self.settings.error_handling == ErrorHandling::Continue {
                    tracing::warn!("⚠️ Node '{}' failed, continuing: {}", node.id, message);
                    Ok(())
                } else {
                    Err(EngineError::NodeFailed {
                        node_id: node.id.clone(),
                        message,
                    })
                }
            }
        }
    }

    fn record_error(&mut self, node: &WorkflowNode, message: String, started_at: chrono::DateTime<Utc>) {
        tracing::error!("❌ Node '{}' failed: {}", node.id, message);
        self.results.push(NodeExecutionResult {
            node_id: node.id.clone(),
            status: NodeStatus::Error,
            data: None,
            error: Some(message),
            started_at,
            finished_at: Utc::now(),
        });
    }

    /// Invoke a handler under the retry policy and the workflow deadline
    async fn invoke(
        &self,
        handler: &dyn NodeHandler,
        node: &WorkflowNode,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, InvocationFailure> {
        let max_attempts = match self.settings.error_handling {
            ErrorHandling::Retry => self.settings.max_retries.saturating_add(1),
            _ => 1,
        };
        let mut attempt = 1u32;

        loop {
            let call = handler.execute(node, input.clone(), ctx);
            let outcome = match self.remaining()? {
                Some(remaining) => tokio::time::timeout(remaining, call)
                    .await
                    .map_err(|_| InvocationFailure::Timeout)?,
                None => call.await,
            };

            match outcome {
                Ok(output) => return Ok(output),
                Err(e) if attempt < max_attempts => {
                    let delay = self
                        .engine
                        .config
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    if let Some(remaining) = self.remaining()? {
                        if delay >= remaining {
                            return Err(InvocationFailure::Timeout);
                        }
                    }
                    tracing::warn!(
                        "🔁 Node '{}' attempt {}/{} failed, retrying in {:?}: {:#}",
                        node.id,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(InvocationFailure::Handler(format!("{:#}", e))),
            }
        }
    }

    /// Time left before the deadline; `Err` once it has passed
    fn remaining(&self) -> Result<Option<Duration>, InvocationFailure> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .map(Some)
                .ok_or(InvocationFailure::Timeout),
        }
    }
}
