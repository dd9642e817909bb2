/// Durable queue worker
///
/// Each worker is one tokio task that claims a job, runs it through the
/// engine and records the outcome. Idle workers sleep until an enqueue wakes
/// them or the poll interval elapses (delayed jobs only become due by time).

use crate::{
    queue::{
        store::{duration_millis, now_millis, ClaimedJob, JobStore},
        JobState, QueueError,
    },
    runtime::{
        context::{ExecutionRequest, TriggerMode},
        engine::ExecutionEngine,
    },
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{watch, Notify};

pub struct Worker {
    pub id: usize,
    pub store: JobStore,
    pub engine: Arc<ExecutionEngine>,
    pub paused: Arc<AtomicBool>,
    pub notify: Arc<Notify>,
    /// Delay before the first job retry; doubled per attempt
    pub backoff: Duration,
    pub poll_interval: Duration,
}

impl Worker {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("👷 Queue worker {} started", self.id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = if self.paused.load(Ordering::SeqCst) {
                false
            } else {
                match self.poll_once().await {
                    Ok(processed) => processed,
                    Err(e) => {
                        tracing::error!("❌ Queue worker {} poll failed: {}", self.id, e);
                        false
                    }
                }
            };
            if processed {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::debug!("👷 Queue worker {} stopped", self.id);
    }

    /// Promote due delayed jobs, then claim and process at most one
    ///
    /// Returns whether a job was processed.
    pub async fn poll_once(&self) -> Result<bool, QueueError> {
        let now = now_millis();
        let promoted = self.store.promote_delayed(now).await?;
        if promoted > 0 {
            tracing::debug!("⏰ Promoted {} delayed jobs", promoted);
        }

        match self.store.claim_next(now).await? {
            Some(job) => {
                if let Err(e) = self.process(&job).await {
                    self.release(&job, &e).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        let payload = &job.payload;
        tracing::info!(
            "🏃 Worker {} processing job '{}' for workflow '{}' (attempt {}/{})",
            self.id,
            job.id,
            payload.workflow_id,
            job.attempts_made,
            job.max_attempts
        );

        let Some(workflow) = self.engine.workflows().get(&payload.workflow_id) else {
            let reason = format!("workflow not found: {}", payload.workflow_id);
            tracing::error!("❌ Job '{}' failed permanently: {}", job.id, reason);
            self.store.fail(&job.id, &reason, None, None, now_millis()).await?;
            return Ok(());
        };

        let mode = if job.attempts_made > 1 {
            TriggerMode::Retry
        } else {
            payload.mode
        };
        let mut request = ExecutionRequest::new(mode).with_execution_id(payload.execution_id);
        request.input = payload.input.clone();
        request.user_id = payload.user_id.clone();
        request.variables = payload.variables.clone();

        self.store.set_progress(&job.id, 10).await?;
        let result = self.engine.execute(&workflow, request).await;
        let envelope = serde_json::to_value(&result)?;
        let now = now_millis();

        if result.is_success() {
            self.store.complete(&job.id, &envelope, now).await?;
            tracing::info!("✅ Job '{}' completed (execution_id={})", job.id, result.execution_id);
            return Ok(());
        }

        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "execution failed".to_string());
        let retry_at = self.retry_at(job, now);

        match self.store.fail(&job.id, &reason, Some(&envelope), retry_at, now).await? {
            JobState::Delayed => tracing::warn!(
                "🔁 Job '{}' attempt {}/{} failed, retrying in {:?}: {}",
                job.id,
                job.attempts_made,
                job.max_attempts,
                self.retry_delay(job.attempts_made),
                reason
            ),
            _ => tracing::error!(
                "❌ Job '{}' failed after {} attempts: {}",
                job.id,
                job.attempts_made,
                reason
            ),
        }
        Ok(())
    }

    /// Move a claimed job out of `active` after its outcome could not be stored
    ///
    /// The attempt counts as failed and follows the normal retry policy. If
    /// this write fails too, the job stays `active` until the next startup
    /// recovers it.
    async fn release(&self, job: &ClaimedJob, error: &QueueError) {
        tracing::error!("❌ Worker {} could not record job '{}': {}", self.id, job.id, error);

        let now = now_millis();
        let reason = format!("failed to record job outcome: {}", error);
        if let Err(e) = self
            .store
            .fail(&job.id, &reason, None, self.retry_at(job, now), now)
            .await
        {
            tracing::error!("❌ Job '{}' stays active until restart: {}", job.id, e);
        }
    }

    /// When to run the next attempt, or `None` once attempts are exhausted
    fn retry_at(&self, job: &ClaimedJob, now: i64) -> Option<i64> {
        (job.attempts_made < job.max_attempts)
            .then(|| now.saturating_add(duration_millis(self.retry_delay(job.attempts_made))))
    }

    /// Backoff after the given (1-based) attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
