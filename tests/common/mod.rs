//! Common test utilities: engines wired to scripted handlers, workflow
//! builders and queue polling helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use stepline::{
    config::{Config, EngineConfig, QueueConfig, SchedulerConfig, ServerConfig},
    queue::{JobQueue, JobState, JobStatus, QueueError},
    runtime::{
        context::ExecutionContext,
        handlers::{mock::MockHandler, HandlerRegistry, NodeHandler},
        ExecutionEngine,
    },
    workflow::{
        ErrorHandling, NodeType, WorkflowDefinition, WorkflowEdge, WorkflowNode, WorkflowRegistry,
        WorkflowSettings,
    },
};

/// Reports what a handler can see of its execution context.
pub struct ContextProbe;

#[async_trait]
impl NodeHandler for ContextProbe {
    async fn execute(&self, node: &WorkflowNode, input: Value, ctx: &ExecutionContext) -> anyhow::Result<Value> {
        Ok(json!({
            "node": node.id,
            "input": input,
            "mode": ctx.mode.to_string(),
            "userId": ctx.user_id,
            "executionId": ctx.execution_id.to_string(),
            "variables": ctx.variables,
        }))
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        retry_base_delay: Duration::from_millis(1),
    }
}

/// Built-ins plus the mock on `code` nodes and the probe on `chatMessage` nodes
pub fn handlers_with(mock: Arc<MockHandler>) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::with_builtins();
    handlers.register(NodeType::Code, mock);
    handlers.register(NodeType::ChatMessage, Arc::new(ContextProbe));
    handlers
}

pub fn engine_with(mock: MockHandler) -> (Arc<ExecutionEngine>, Arc<MockHandler>) {
    let mock = Arc::new(mock);
    let engine = ExecutionEngine::new(
        Arc::new(handlers_with(Arc::clone(&mock))),
        Arc::new(WorkflowRegistry::new()),
        engine_config(),
    );
    (Arc::new(engine), mock)
}

pub fn code(id: &str) -> WorkflowNode {
    WorkflowNode::new(id, NodeType::Code)
}

pub fn probe(id: &str) -> WorkflowNode {
    WorkflowNode::new(id, NodeType::ChatMessage)
}

pub fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge::new(source, target)
}

pub fn workflow(id: &str, nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: format!("{} workflow", id),
        nodes,
        edges,
        settings: None,
    }
}

pub fn with_policy(
    mut wf: WorkflowDefinition,
    error_handling: ErrorHandling,
    max_retries: u32,
    timeout_ms: Option<u64>,
) -> WorkflowDefinition {
    wf.settings = Some(WorkflowSettings {
        error_handling,
        max_retries,
        timeout_ms,
    });
    wf
}

/// In-memory durable queue settings with fast retries
pub fn memory_queue_config(concurrency: usize) -> QueueConfig {
    QueueConfig {
        enabled: true,
        url: "sqlite::memory:".to_string(),
        concurrency,
        backoff: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        ..QueueConfig::default()
    }
}

pub fn test_config(queue: QueueConfig) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        queue,
        scheduler: SchedulerConfig::default(),
        engine: engine_config(),
    }
}

/// Poll a job until it reaches `state` or five seconds pass
pub async fn wait_for_state(queue: &JobQueue, job_id: &str, state: JobState) -> JobStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match queue.get_job_status(job_id).await {
            Ok(status) if status.state == state => return status,
            Ok(_) | Err(QueueError::JobNotFound(_)) => {}
            Err(e) => panic!("job status query failed: {}", e),
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "job '{}' never reached {:?}; last status: {:?}",
                job_id,
                state,
                queue.get_job_status(job_id).await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
