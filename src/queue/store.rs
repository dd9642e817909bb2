/// SQLite persistence layer for durable jobs
///
/// One row per job in `queue_jobs`. The payload is stored as JSON; state,
/// priority and timestamps are plain columns so claiming stays a single
/// indexed UPDATE. Timestamps are Unix milliseconds.

use crate::queue::{JobPayload, JobState, JobStatus, QueueError, QueueStats};
use crate::config::QueueConfig;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::{str::FromStr, time::Duration};
use uuid::Uuid;

/// A job that a worker has just moved to `active`
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: JobPayload,
    /// Attempts including the current one
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// Result of inserting a job with a caller-chosen id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate { execution_id: Uuid },
}

/// Row to insert
#[derive(Debug)]
pub struct NewJob<'a> {
    pub id: &'a str,
    pub payload: &'a JobPayload,
    pub priority: i64,
    pub max_attempts: u32,
    /// Delayed until this instant (ms); `None` makes it claimable right away
    pub available_at: Option<i64>,
    pub now: i64,
}

/// SQLite-backed job table
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open the pool described by the queue config and initialize the schema
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let in_memory = config.url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                }
            }
        }

        // Every in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the job table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                workflow_id TEXT NOT NULL,
                state TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                available_at INTEGER NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                return_value TEXT,
                failed_reason TEXT,
                created_at INTEGER NOT NULL,
                processed_at INTEGER,
                finished_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Claim order: state, then priority, then FIFO
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_jobs_claim
            ON queue_jobs(state, priority, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Put jobs left `active` by a previous process back in line
    pub async fn recover_stalled(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("UPDATE queue_jobs SET state = 'waiting' WHERE state = 'active'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert a job; an existing id is left untouched
    pub async fn insert(&self, job: NewJob<'_>) -> Result<InsertOutcome, QueueError> {
        let payload_json = serde_json::to_string(job.payload)?;
        let state = if job.available_at.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let result = sqlx::query(
            r#"
            INSERT INTO queue_jobs
                (id, workflow_id, state, priority, payload, max_attempts, available_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.payload.workflow_id)
        .bind(state.as_str())
        .bind(job.priority)
        .bind(&payload_json)
        .bind(job.max_attempts as i64)
        .bind(job.available_at.unwrap_or(job.now))
        .bind(job.now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(InsertOutcome::Inserted);
        }

        let row = sqlx::query("SELECT payload FROM queue_jobs WHERE id = ?")
            .bind(job.id)
            .fetch_one(&self.pool)
            .await?;
        let existing: JobPayload = serde_json::from_str(&row.try_get::<String, _>("payload")?)?;
        Ok(InsertOutcome::Duplicate {
            execution_id: existing.execution_id,
        })
    }

    /// Move delayed jobs whose time has come to `waiting`
    pub async fn promote_delayed(&self, now: i64) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE queue_jobs SET state = 'waiting' WHERE state = 'delayed' AND available_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Atomically take the next waiting job
    ///
    /// Lowest priority value first, then enqueue order. Returns `None` when
    /// nothing is waiting.
    pub async fn claim_next(&self, now: i64) -> Result<Option<ClaimedJob>, QueueError> {
        let row = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'active', attempts_made = attempts_made + 1, processed_at = ?, progress = 0
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE state = 'waiting'
                ORDER BY priority ASC, seq ASC
                LIMIT 1
            )
            RETURNING id, payload, attempts_made, max_attempts
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload_json: String = row.try_get("payload")?;
                Ok(Some(ClaimedJob {
                    id: row.try_get("id")?,
                    payload: serde_json::from_str(&payload_json)?,
                    attempts_made: row.try_get::<i64, _>("attempts_made")? as u32,
                    max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_jobs SET progress = ? WHERE id = ?")
            .bind(progress as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, id: &str, return_value: &Value, now: i64) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'completed', progress = 100, return_value = ?, failed_reason = NULL, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(return_value)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt
    ///
    /// With `retry_at` the job goes back to `delayed`; otherwise it is
    /// finished as `failed`.
    pub async fn fail(
        &self,
        id: &str,
        reason: &str,
        return_value: Option<&Value>,
        retry_at: Option<i64>,
        now: i64,
    ) -> Result<JobState, QueueError> {
        let return_json = return_value.map(serde_json::to_string).transpose()?;

        match retry_at {
            Some(at) => {
                sqlx::query(
                    r#"
                    UPDATE queue_jobs
                    SET state = 'delayed', available_at = ?, failed_reason = ?, return_value = ?
                    WHERE id = ?
                    "#,
                )
                .bind(at)
                .bind(reason)
                .bind(return_json)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Ok(JobState::Delayed)
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE queue_jobs
                    SET state = 'failed', failed_reason = ?, return_value = ?, finished_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(reason)
                .bind(return_json)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Ok(JobState::Failed)
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobStatus>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, state, payload, progress, return_value, failed_reason,
                   attempts_made, created_at, processed_at, finished_at
            FROM queue_jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| job_status_from_row(&row)).transpose()
    }

    pub async fn state_of(&self, id: &str) -> Result<Option<JobState>, QueueError> {
        let row = sqlx::query("SELECT state FROM queue_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(JobState::parse(&row.try_get::<String, _>("state")?)),
            None => Ok(None),
        }
    }

    /// Job counts per state (`paused` is left false)
    pub async fn counts(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM queue_jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let total = row.try_get::<i64, _>("total")? as u64;
            match JobState::parse(&row.try_get::<String, _>("state")?) {
                Some(JobState::Waiting) => stats.waiting = total,
                Some(JobState::Active) => stats.active = total,
                Some(JobState::Delayed) => stats.delayed = total,
                Some(JobState::Completed) => stats.completed = total,
                Some(JobState::Failed) => stats.failed = total,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Requeue a failed job with a fresh attempt budget; false if not failed
    pub async fn retry_failed(&self, id: &str, now: i64) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'waiting', attempts_made = 0, progress = 0, failed_reason = NULL,
                return_value = NULL, available_at = ?, processed_at = NULL, finished_at = NULL
            WHERE id = ? AND state = 'failed'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a job that has not started; false if it is past that point
    pub async fn delete_pending(&self, id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE id = ? AND state IN ('waiting', 'delayed')")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete jobs in `state` that finished before `cutoff`
    pub async fn prune(&self, state: JobState, cutoff: i64) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE state = ? AND finished_at < ?")
            .bind(state.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn job_status_from_row(row: &SqliteRow) -> Result<JobStatus, QueueError> {
    let id: String = row.try_get("id")?;
    let raw_state: String = row.try_get("state")?;
    let state = JobState::parse(&raw_state).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown job state '{}' for job '{}'", raw_state, id).into())
    })?;
    let payload: JobPayload = serde_json::from_str(&row.try_get::<String, _>("payload")?)?;
    let data = row
        .try_get::<Option<String>, _>("return_value")?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    Ok(JobStatus {
        id,
        workflow_id: row.try_get("workflow_id")?,
        execution_id: payload.execution_id,
        state,
        progress: row.try_get::<i64, _>("progress")?.clamp(0, 100) as u8,
        data,
        error: row.try_get("failed_reason")?,
        attempts_made: row.try_get::<i64, _>("attempts_made")? as u32,
        created_at: from_millis(row.try_get("created_at")?),
        processed_at: row.try_get::<Option<i64>, _>("processed_at")?.map(from_millis),
        finished_at: row.try_get::<Option<i64>, _>("finished_at")?.map(from_millis),
    })
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Millisecond length of `d`, saturating at `i64::MAX`
pub fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::TriggerMode;

    async fn memory_store() -> JobStore {
        let config = QueueConfig {
            url: "sqlite::memory:".to_string(),
            ..QueueConfig::default()
        };
        JobStore::connect(&config).await.unwrap()
    }

    fn payload(workflow_id: &str) -> JobPayload {
        JobPayload {
            workflow_id: workflow_id.to_string(),
            execution_id: Uuid::new_v4(),
            input: None,
            user_id: None,
            mode: TriggerMode::Manual,
            variables: Default::default(),
        }
    }

    fn new_job<'a>(id: &'a str, payload: &'a JobPayload, priority: i64) -> NewJob<'a> {
        NewJob {
            id,
            payload,
            priority,
            max_attempts: 3,
            available_at: None,
            now: 1_000,
        }
    }

    #[tokio::test]
    async fn claims_by_priority_then_fifo() {
        let store = memory_store().await;
        let (a, b, c) = (payload("wf"), payload("wf"), payload("wf"));
        store.insert(new_job("a", &a, 5)).await.unwrap();
        store.insert(new_job("b", &b, 1)).await.unwrap();
        store.insert(new_job("c", &c, 5)).await.unwrap();

        let order: Vec<String> = [
            store.claim_next(2_000).await.unwrap().unwrap().id,
            store.claim_next(2_000).await.unwrap().unwrap().id,
            store.claim_next(2_000).await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert!(store.claim_next(2_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_returns_existing_execution() {
        let store = memory_store().await;
        let first = payload("wf");
        let second = payload("wf");
        assert_eq!(store.insert(new_job("dup", &first, 0)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert(new_job("dup", &second, 0)).await.unwrap(),
            InsertOutcome::Duplicate {
                execution_id: first.execution_id
            }
        );
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_promotion() {
        let store = memory_store().await;
        let p = payload("wf");
        store
            .insert(NewJob {
                available_at: Some(5_000),
                ..new_job("later", &p, 0)
            })
            .await
            .unwrap();

        assert_eq!(store.state_of("later").await.unwrap(), Some(JobState::Delayed));
        assert_eq!(store.promote_delayed(4_999).await.unwrap(), 0);
        assert!(store.claim_next(4_999).await.unwrap().is_none());
        assert_eq!(store.promote_delayed(5_000).await.unwrap(), 1);
        assert_eq!(store.claim_next(5_000).await.unwrap().unwrap().id, "later");
    }

    #[tokio::test]
    async fn stalled_jobs_are_recovered() {
        let store = memory_store().await;
        let p = payload("wf");
        store.insert(new_job("crashed", &p, 0)).await.unwrap();
        store.claim_next(2_000).await.unwrap();

        assert_eq!(store.recover_stalled().await.unwrap(), 1);
        assert_eq!(store.state_of("crashed").await.unwrap(), Some(JobState::Waiting));
    }

    #[tokio::test]
    async fn prune_only_touches_old_jobs_of_the_given_state() {
        let store = memory_store().await;
        let (a, b) = (payload("wf"), payload("wf"));
        store.insert(new_job("old", &a, 0)).await.unwrap();
        store.insert(new_job("new", &b, 0)).await.unwrap();
        store.claim_next(1_000).await.unwrap();
        store.claim_next(1_000).await.unwrap();
        store.complete("old", &Value::Null, 1_000).await.unwrap();
        store.complete("new", &Value::Null, 9_000).await.unwrap();

        assert_eq!(store.prune(JobState::Failed, 10_000).await.unwrap(), 0);
        assert_eq!(store.prune(JobState::Completed, 5_000).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }
}
