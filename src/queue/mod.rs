/// Job queue: decides when and where an execution runs
///
/// Two backends sit behind [`QueueBackend`], picked once by
/// [`JobQueue::connect`]:
/// - durable: jobs persist in SQLite and a worker pool drains them with
///   retry and exponential backoff
/// - direct: every job runs inline and the caller gets the finished result
///
/// Callers only ever talk to [`JobQueue`], so they never branch on the mode.

pub mod direct;
pub mod durable;
pub mod store;
pub mod worker;

use crate::{
    config::QueueConfig,
    runtime::{
        context::{ExecutionResult, TriggerMode},
        engine::ExecutionEngine,
    },
    workflow::WorkflowDefinition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

pub use direct::DirectQueue;
pub use durable::DurableQueue;

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// Operation needs the durable backend but the queue runs in direct mode
    #[error("job queue is unavailable (running in direct mode)")]
    Unavailable,

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job exists but is not in a state the operation accepts
    #[error("job '{job_id}' is {state}, expected {expected}")]
    InvalidState {
        job_id: String,
        state: JobState,
        expected: &'static str,
    },

    #[error("queue backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Which backend the queue selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Durable,
    Direct,
}

/// Serialized unit of work handed to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub workflow_id: String,
    pub execution_id: Uuid,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub mode: TriggerMode,
    /// Trigger-provided context variables (webhook headers, query, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
}

/// Per-job enqueue options
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub user_id: Option<String>,
    pub mode: TriggerMode,
    /// Lower runs first; ties run in enqueue order
    pub priority: i64,
    /// Hold the job back for this long before it becomes claimable
    pub delay: Option<Duration>,
    /// Caller-chosen id; enqueueing the same id twice is a no-op
    pub job_id: Option<String>,
    pub variables: HashMap<String, Value>,
}

impl EnqueueOptions {
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// What the caller gets back from `enqueue`
#[derive(Debug, Clone)]
pub enum EnqueueReceipt {
    /// Accepted by the durable backend; poll the job for the outcome
    Queued { execution_id: Uuid, job_id: String },
    /// Ran inline in direct mode
    Completed(ExecutionResult),
}

impl EnqueueReceipt {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::Queued { execution_id, .. } => *execution_id,
            Self::Completed(result) => result.execution_id,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued { job_id, .. } => Some(job_id),
            Self::Completed(_) => None,
        }
    }
}

/// Lifecycle state of a durable job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "delayed" => Some(Self::Delayed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one job as reported to API callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub state: JobState,
    /// 0-100
    pub progress: u8,
    /// Execution result envelope once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Job counts per state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Storage and dispatch strategy behind [`JobQueue`]
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn mode(&self) -> QueueMode;

    async fn enqueue(&self, payload: JobPayload, options: &EnqueueOptions) -> Result<EnqueueReceipt, QueueError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Requeue a failed job
    async fn retry(&self, job_id: &str) -> Result<(), QueueError>;

    /// Remove a job that has not started yet
    async fn cancel(&self, job_id: &str) -> Result<(), QueueError>;

    async fn pause(&self) -> Result<(), QueueError>;

    async fn resume(&self) -> Result<(), QueueError>;

    /// Delete finished jobs older than `older_than`; returns the number removed
    async fn cleanup(&self, older_than: Duration) -> Result<u64, QueueError>;

    /// Stop background tasks and wait for in-flight jobs
    async fn shutdown(&self);
}

/// Facade over the selected backend
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    engine: Arc<ExecutionEngine>,
}

impl JobQueue {
    /// Connect to the configured backend, falling back to direct mode
    ///
    /// A disabled queue or an unreachable backend never fails startup.
    pub async fn connect(config: &QueueConfig, engine: Arc<ExecutionEngine>) -> Self {
        if !config.enabled {
            tracing::info!("📥 Job queue disabled, running executions inline (direct mode)");
            return Self::direct(engine);
        }

        match DurableQueue::connect(config, Arc::clone(&engine)).await {
            Ok(durable) => {
                tracing::info!(
                    "📥 Job queue connected ({} workers, {} attempts per job)",
                    config.concurrency,
                    config.max_attempts
                );
                Self {
                    backend: Arc::new(durable),
                    engine,
                }
            }
            Err(e) => {
                tracing::warn!("⚠️ Job queue backend unreachable, falling back to direct mode: {}", e);
                Self::direct(engine)
            }
        }
    }

    /// Queue that always runs inline
    pub fn direct(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            backend: Arc::new(DirectQueue::new(Arc::clone(&engine))),
            engine,
        }
    }

    /// Build over an explicit backend
    pub fn with_backend(backend: Arc<dyn QueueBackend>, engine: Arc<ExecutionEngine>) -> Self {
        Self { backend, engine }
    }

    pub fn mode(&self) -> QueueMode {
        self.backend.mode()
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Make a workflow executable by queued jobs
    pub fn register_workflow(&self, workflow: WorkflowDefinition) {
        self.engine.register_workflow(workflow);
    }

    /// Submit an execution of a registered workflow
    ///
    /// # Errors
    /// [`QueueError::WorkflowNotFound`] if the workflow is not registered.
    pub async fn enqueue(
        &self,
        workflow_id: &str,
        input: Option<Value>,
        options: EnqueueOptions,
    ) -> Result<EnqueueReceipt, QueueError> {
        if self.engine.workflows().get(workflow_id).is_none() {
            return Err(QueueError::WorkflowNotFound(workflow_id.to_string()));
        }

        let payload = JobPayload {
            workflow_id: workflow_id.to_string(),
            execution_id: Uuid::new_v4(),
            input,
            user_id: options.user_id.clone(),
            mode: options.mode,
            variables: options.variables.clone(),
        };
        tracing::debug!(
            "📨 Enqueueing workflow '{}' (mode: {}, execution_id={})",
            workflow_id,
            payload.mode,
            payload.execution_id
        );
        self.backend.enqueue(payload, &options).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        self.backend.job_status(job_id).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        self.backend.stats().await
    }

    pub async fn retry(&self, job_id: &str) -> Result<(), QueueError> {
        self.backend.retry(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), QueueError> {
        self.backend.cancel(job_id).await
    }

    pub async fn pause(&self) -> Result<(), QueueError> {
        self.backend.pause().await
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        self.backend.resume().await
    }

    pub async fn cleanup(&self, older_than: Duration) -> Result<u64, QueueError> {
        self.backend.cleanup(older_than).await
    }

    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("mode", &self.mode()).finish()
    }
}
