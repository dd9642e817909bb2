/// Durable queue backend: SQLite job table plus a tokio worker pool
///
/// Jobs survive process restarts (jobs caught mid-run are requeued on the
/// next start). Workers and the janitor are spawned on connect and stopped by
/// `shutdown`.

use crate::{
    config::QueueConfig,
    queue::{
        store::{duration_millis, now_millis, InsertOutcome, JobStore, NewJob},
        worker::Worker,
        EnqueueOptions, EnqueueReceipt, JobPayload, JobState, JobStatus, QueueBackend, QueueError, QueueMode,
        QueueStats,
    },
    runtime::engine::ExecutionEngine,
};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use uuid::Uuid;

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

pub struct DurableQueue {
    store: JobStore,
    config: QueueConfig,
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DurableQueue {
    /// Open the job store and start the workers and the janitor
    pub async fn connect(config: &QueueConfig, engine: Arc<ExecutionEngine>) -> Result<Self, QueueError> {
        let store = JobStore::connect(config).await?;
        let recovered = store.recover_stalled().await?;
        if recovered > 0 {
            tracing::warn!("⚠️ Requeued {} jobs interrupted by a previous shutdown", recovered);
        }

        let (shutdown_tx, _) = watch::channel(false);
        let paused = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let mut tasks = Vec::with_capacity(config.concurrency + 1);

        for id in 0..config.concurrency.max(1) {
            let worker = Worker {
                id,
                store: store.clone(),
                engine: Arc::clone(&engine),
                paused: Arc::clone(&paused),
                notify: Arc::clone(&notify),
                backoff: config.backoff,
                poll_interval: config.poll_interval,
            };
            tasks.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
        }
        tasks.push(tokio::spawn(run_janitor(
            store.clone(),
            config.clone(),
            shutdown_tx.subscribe(),
        )));

        Ok(Self {
            store,
            config: config.clone(),
            paused,
            notify,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Delete finished jobs older than their retention window
    async fn prune(&self, completed_before: Duration, failed_before: Duration) -> Result<u64, QueueError> {
        prune_finished(&self.store, completed_before, failed_before).await
    }
}

#[async_trait]
impl QueueBackend for DurableQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Durable
    }

    async fn enqueue(&self, payload: JobPayload, options: &EnqueueOptions) -> Result<EnqueueReceipt, QueueError> {
        let job_id = options
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = now_millis();

        let outcome = self
            .store
            .insert(NewJob {
                id: &job_id,
                payload: &payload,
                priority: options.priority,
                max_attempts: self.config.max_attempts.max(1),
                available_at: options.delay.map(|d| now.saturating_add(duration_millis(d))),
                now,
            })
            .await?;

        let execution_id = match outcome {
            InsertOutcome::Inserted => {
                tracing::info!("📥 Queued job '{}' for workflow '{}'", job_id, payload.workflow_id);
                self.notify.notify_one();
                payload.execution_id
            }
            InsertOutcome::Duplicate { execution_id } => {
                tracing::debug!("♻️ Job '{}' already queued, reusing execution {}", job_id, execution_id);
                execution_id
            }
        };

        Ok(EnqueueReceipt::Queued { execution_id, job_id })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = self.store.counts().await?;
        stats.paused = self.paused.load(Ordering::SeqCst);
        Ok(stats)
    }

    async fn retry(&self, job_id: &str) -> Result<(), QueueError> {
        if self.store.retry_failed(job_id, now_millis()).await? {
            tracing::info!("🔁 Job '{}' requeued", job_id);
            self.notify.notify_one();
            return Ok(());
        }

        match self.store.state_of(job_id).await? {
            Some(state) => Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                state,
                expected: "failed",
            }),
            None => Err(QueueError::JobNotFound(job_id.to_string())),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), QueueError> {
        if self.store.delete_pending(job_id).await? {
            tracing::info!("🗑️ Job '{}' cancelled", job_id);
            return Ok(());
        }

        match self.store.state_of(job_id).await? {
            Some(state) => Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                state,
                expected: "waiting or delayed",
            }),
            None => Err(QueueError::JobNotFound(job_id.to_string())),
        }
    }

    async fn pause(&self) -> Result<(), QueueError> {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("⏸️ Job queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), QueueError> {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        tracing::info!("▶️ Job queue resumed");
        Ok(())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, QueueError> {
        let removed = self.prune(older_than, older_than).await?;
        tracing::info!("🧹 Cleaned up {} finished jobs older than {:?}", removed, older_than);
        Ok(removed)
    }

    async fn shutdown(&self) {
        tracing::info!("⏹️ Stopping job queue workers");
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_waiters();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("⚠️ Queue task ended abnormally: {}", e);
            }
        }

        self.store.close().await;
        tracing::info!("✅ Job queue stopped");
    }
}

async fn prune_finished(
    store: &JobStore,
    completed_before: Duration,
    failed_before: Duration,
) -> Result<u64, QueueError> {
    let now = now_millis();
    let completed = store
        .prune(JobState::Completed, now.saturating_sub(duration_millis(completed_before)))
        .await?;
    let failed = store
        .prune(JobState::Failed, now.saturating_sub(duration_millis(failed_before)))
        .await?;
    Ok(completed + failed)
}

/// Periodically prune finished jobs past their retention window
async fn run_janitor(store: JobStore, config: QueueConfig, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(JANITOR_INTERVAL);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match prune_finished(&store, config.completed_retention, config.failed_retention).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!("🧹 Janitor pruned {} finished jobs", removed),
                    Err(e) => tracing::warn!("⚠️ Janitor prune failed: {}", e),
                }
            }
        }
    }
}
