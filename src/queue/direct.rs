/// Direct (inline) queue backend
///
/// Used when no durable backend is configured or reachable. `enqueue` runs
/// the execution to completion before returning; there is no job record, so
/// every management operation reports the queue as unavailable.

use crate::{
    queue::{EnqueueOptions, EnqueueReceipt, JobPayload, JobStatus, QueueBackend, QueueError, QueueMode, QueueStats},
    runtime::{context::ExecutionRequest, engine::ExecutionEngine},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct DirectQueue {
    engine: Arc<ExecutionEngine>,
}

impl DirectQueue {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl QueueBackend for DirectQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Direct
    }

    async fn enqueue(&self, payload: JobPayload, options: &EnqueueOptions) -> Result<EnqueueReceipt, QueueError> {
        if let Some(delay) = options.delay {
            tracing::debug!("⏭️ Ignoring {:?} delay for '{}' in direct mode", delay, payload.workflow_id);
        }

        let mut request = ExecutionRequest::new(payload.mode).with_execution_id(payload.execution_id);
        request.input = payload.input;
        request.user_id = payload.user_id;
        request.variables = payload.variables;

        let workflow = self
            .engine
            .workflows()
            .get(&payload.workflow_id)
            .ok_or_else(|| QueueError::WorkflowNotFound(payload.workflow_id.clone()))?;
        Ok(EnqueueReceipt::Completed(self.engine.execute(&workflow, request).await))
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatus, QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn retry(&self, _job_id: &str) -> Result<(), QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn cancel(&self, _job_id: &str) -> Result<(), QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn pause(&self) -> Result<(), QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn resume(&self) -> Result<(), QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn cleanup(&self, _older_than: Duration) -> Result<u64, QueueError> {
        Err(QueueError::Unavailable)
    }

    async fn shutdown(&self) {}
}
