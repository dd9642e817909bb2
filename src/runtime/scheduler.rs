/// Background cron scheduler service
///
/// Keeps a table of scheduled jobs, each bound to one tokio-cron-scheduler
/// timer while active. A firing timer submits the workflow to the job queue
/// with mode `schedule`; stopping a job drops its timer but keeps the record
/// so it can be resumed later under the same id.

use crate::{
    config::SchedulerConfig,
    queue::{EnqueueOptions, EnqueueReceipt, JobQueue, QueueError},
    runtime::{
        context::TriggerMode,
        cron::{CronParseError, CronSchedule},
    },
    workflow::WorkflowDefinition,
};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    InvalidCronExpression(#[from] CronParseError),

    #[error("invalid timezone: '{0}'")]
    InvalidTimezone(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("scheduled job not found: {0}")]
    JobNotFound(String),

    #[error("timer error: {0}")]
    Timer(#[from] JobSchedulerError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One recurring trigger
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub workflow_id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    /// Handle of the installed timer while active
    #[serde(skip)]
    timer: Option<Uuid>,
    #[serde(skip)]
    schedule: CronSchedule,
    #[serde(skip)]
    tz: Tz,
}

impl ScheduledJob {
    /// Whether a timer tick at `now` should fire this job
    ///
    /// Both day fields must match. A local minute that occurs twice when
    /// clocks fall back fires only on its first occurrence.
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.schedule.matches(now, self.tz) {
            return false;
        }
        match self.last_run_at {
            Some(last) => local_minute(last, self.tz) != local_minute(now, self.tz),
            None => true,
        }
    }
}

fn local_minute(at: DateTime<Utc>, tz: Tz) -> (NaiveDate, u32, u32) {
    let local = at.with_timezone(&tz);
    (local.date_naive(), local.hour(), local.minute())
}

type JobTable = Arc<RwLock<HashMap<String, ScheduledJob>>>;

/// Cron scheduler service
pub struct Scheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    jobs: JobTable,
    queue: JobQueue,
    default_timezone: Tz,
}

impl Scheduler {
    /// Create new scheduler service (timers do not fire until `start`)
    pub async fn new(queue: JobQueue, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let default_timezone = parse_timezone(&config.default_timezone)?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            queue,
            default_timezone,
        })
    }

    /// Start firing timers
    pub async fn start(&self) -> Result<(), SchedulerError> {
        tracing::info!("⏰ Starting cron scheduler service");
        self.scheduler.read().await.start().await?;
        tracing::info!("✅ Cron scheduler started");
        Ok(())
    }

    /// Stop every timer; job records are discarded
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        tracing::info!("⏹️ Stopping cron scheduler service");
        self.jobs.write().await.clear();
        self.scheduler.write().await.shutdown().await?;
        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Make a workflow schedulable
    pub fn register_workflow(&self, workflow: WorkflowDefinition) {
        self.queue.register_workflow(workflow);
    }

    /// Parse a five-field cron expression without scheduling it
    pub fn validate_cron(expression: &str) -> Result<CronSchedule, SchedulerError> {
        Ok(CronSchedule::parse(expression)?)
    }

    /// Schedule a registered workflow; `timezone` defaults to the configured zone
    pub async fn schedule(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<ScheduledJob, SchedulerError> {
        let schedule = CronSchedule::parse(cron_expression)?;
        let tz = match timezone {
            Some(name) => parse_timezone(name)?,
            None => self.default_timezone,
        };
        if self.queue.engine().workflows().get(workflow_id).is_none() {
            return Err(SchedulerError::WorkflowNotFound(workflow_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let timer = self.install_timer(&id, &schedule, tz).await?;
        let job = ScheduledJob {
            id: id.clone(),
            workflow_id: workflow_id.to_string(),
            cron_expression: cron_expression.to_string(),
            timezone: tz.name().to_string(),
            is_active: true,
            last_run_at: None,
            next_run_at: schedule.next_after(Utc::now(), tz),
            timer: Some(timer),
            schedule,
            tz,
        };

        tracing::info!(
            "📅 Scheduled workflow '{}' as '{}' ({} {}), next run {:?}",
            workflow_id,
            id,
            cron_expression,
            job.timezone,
            job.next_run_at
        );
        self.jobs.write().await.insert(id, job.clone());
        Ok(job)
    }

    /// Remove the timer but keep the record
    pub async fn stop(&self, job_id: &str) -> Result<ScheduledJob, SchedulerError> {
        let (timer, snapshot) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            job.is_active = false;
            job.next_run_at = None;
            (job.timer.take(), job.clone())
        };

        if let Some(timer) = timer {
            self.scheduler.read().await.remove(&timer).await?;
        }
        tracing::info!("⏸️ Stopped scheduled job '{}'", job_id);
        Ok(snapshot)
    }

    /// Install a fresh timer for a stopped job
    pub async fn resume(&self, job_id: &str) -> Result<ScheduledJob, SchedulerError> {
        let (schedule, tz) = {
            let jobs = self.jobs.read().await;
            let job = jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            if job.is_active {
                return Ok(job.clone());
            }
            (job.schedule.clone(), job.tz)
        };

        let timer = self.install_timer(job_id, &schedule, tz).await?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(job) => {
                job.timer = Some(timer);
                job.is_active = true;
                job.next_run_at = schedule.next_after(Utc::now(), tz);
                tracing::info!("▶️ Resumed scheduled job '{}', next run {:?}", job_id, job.next_run_at);
                Ok(job.clone())
            }
            None => {
                // Removed while the timer was being installed
                drop(jobs);
                self.scheduler.read().await.remove(&timer).await?;
                Err(SchedulerError::JobNotFound(job_id.to_string()))
            }
        }
    }

    /// Remove both the timer and the record
    pub async fn remove(&self, job_id: &str) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if let Some(timer) = job.timer {
            self.scheduler.read().await.remove(&timer).await?;
        }
        tracing::info!("🗑️ Removed scheduled job '{}'", job_id);
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Option<ScheduledJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All scheduled jobs, ordered by workflow then id
    pub async fn list(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| (&a.workflow_id, &a.id).cmp(&(&b.workflow_id, &b.id)));
        jobs
    }

    /// Run one firing of a scheduled job now, as its timer would
    pub async fn fire(&self, job_id: &str) -> Option<EnqueueReceipt> {
        fire_scheduled(&self.jobs, &self.queue, job_id, Utc::now()).await
    }

    async fn install_timer(&self, job_id: &str, schedule: &CronSchedule, tz: Tz) -> Result<Uuid, SchedulerError> {
        let expression = schedule.to_six_field();
        let jobs = Arc::clone(&self.jobs);
        let queue = self.queue.clone();
        let schedule_id = job_id.to_string();

        let timer = Job::new_async_tz(expression.as_str(), tz, move |_uuid, _lock| {
            let jobs = Arc::clone(&jobs);
            let queue = queue.clone();
            let schedule_id = schedule_id.clone();

            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!("🔔 Cron timer fired for scheduled job '{}'", schedule_id);
                let due = match jobs.read().await.get(&schedule_id) {
                    Some(job) => job.is_due(now),
                    None => false,
                };
                if due {
                    fire_scheduled(&jobs, &queue, &schedule_id, now).await;
                }
            })
        })?;

        let uuid = self.scheduler.read().await.add(timer).await?;
        tracing::debug!("📝 Installed timer {} ({}) for scheduled job '{}'", uuid, expression, job_id);
        Ok(uuid)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue)
            .field("default_timezone", &self.default_timezone)
            .finish_non_exhaustive()
    }
}

/// Enqueue one run of a scheduled job and advance its bookkeeping
///
/// Never fails: a missing workflow or a queue error is logged, and
/// `lastRunAt`/`nextRunAt` are updated either way.
async fn fire_scheduled(
    jobs: &JobTable,
    queue: &JobQueue,
    schedule_id: &str,
    now: DateTime<Utc>,
) -> Option<EnqueueReceipt> {
    let workflow_id = match jobs.read().await.get(schedule_id) {
        Some(job) if job.is_active => job.workflow_id.clone(),
        Some(_) => {
            tracing::debug!("⏭️ Scheduled job '{}' is stopped, ignoring fire", schedule_id);
            return None;
        }
        None => {
            tracing::debug!("⏭️ Scheduled job '{}' no longer exists, ignoring fire", schedule_id);
            return None;
        }
    };

    let receipt = if queue.engine().workflows().get(&workflow_id).is_none() {
        tracing::warn!(
            "⏭️ Skipping scheduled job '{}': workflow '{}' not found",
            schedule_id,
            workflow_id
        );
        None
    } else {
        let input = json!({
            "trigger": "schedule",
            "timestamp": now.to_rfc3339(),
            "workflowId": workflow_id,
            "scheduleId": schedule_id,
        });
        match queue
            .enqueue(&workflow_id, Some(input), EnqueueOptions::new(TriggerMode::Schedule))
            .await
        {
            Ok(receipt) => {
                tracing::info!(
                    "🚀 Scheduled run of workflow '{}' submitted (execution_id={})",
                    workflow_id,
                    receipt.execution_id()
                );
                Some(receipt)
            }
            Err(e) => {
                tracing::error!("❌ Scheduled run of workflow '{}' failed to enqueue: {}", workflow_id, e);
                None
            }
        }
    };

    if let Some(job) = jobs.write().await.get_mut(schedule_id) {
        job.last_run_at = Some(now);
        job.next_run_at = job.schedule.next_after(now, job.tz);
    }
    receipt
}

fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}
