/// Configuration management for the Stepline runtime
///
/// Handles server binding, job queue backend, scheduler defaults and engine
/// tuning. Every value can be overridden through a `STEPLINE_*` environment
/// variable for container deployment.

use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Job queue configuration
    pub queue: QueueConfig,
    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Execution engine tuning
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Job queue configuration
///
/// With `enabled = false`, or when the backend cannot be reached at startup,
/// the queue runs every job inline (direct mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub enabled: bool,
    /// sqlx SQLite URL of the job store (e.g. "sqlite://data/queue.db?mode=rwc")
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Number of worker tasks
    pub concurrency: usize,
    /// Total attempts per job, first run included
    pub max_attempts: u32,
    /// First retry delay; doubled per attempt
    pub backoff: Duration,
    /// How often idle workers poll for due jobs
    pub poll_interval: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone used when a schedule does not name one
    pub default_timezone: String,
}

/// Execution engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before the first node retry; doubled per attempt
    pub retry_base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "sqlite://data/stepline-queue.db?mode=rwc".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            concurrency: 5,
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(1000),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let queue = QueueConfig::default();
        let scheduler = SchedulerConfig::default();
        let engine = EngineConfig::default();

        Self {
            server: ServerConfig {
                host: std::env::var("STEPLINE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("STEPLINE_PORT", 3004),
            },
            queue: QueueConfig {
                enabled: env_or("STEPLINE_QUEUE_ENABLED", queue.enabled),
                url: std::env::var("STEPLINE_QUEUE_URL").unwrap_or(queue.url),
                max_connections: env_or("STEPLINE_QUEUE_MAX_CONNECTIONS", queue.max_connections),
                busy_timeout: env_millis("STEPLINE_QUEUE_BUSY_TIMEOUT_MS", queue.busy_timeout),
                concurrency: env_or("STEPLINE_QUEUE_CONCURRENCY", queue.concurrency),
                max_attempts: env_or("STEPLINE_QUEUE_ATTEMPTS", queue.max_attempts),
                backoff: env_millis("STEPLINE_QUEUE_BACKOFF_MS", queue.backoff),
                poll_interval: env_millis("STEPLINE_QUEUE_POLL_INTERVAL_MS", queue.poll_interval),
                completed_retention: env_secs("STEPLINE_QUEUE_COMPLETED_RETENTION_SECS", queue.completed_retention),
                failed_retention: env_secs("STEPLINE_QUEUE_FAILED_RETENTION_SECS", queue.failed_retention),
            },
            scheduler: SchedulerConfig {
                default_timezone: std::env::var("STEPLINE_DEFAULT_TIMEZONE").unwrap_or(scheduler.default_timezone),
            },
            engine: EngineConfig {
                retry_base_delay: env_millis("STEPLINE_RETRY_BASE_DELAY_MS", engine.retry_base_delay),
            },
        }
    }
}

/// Parse an env var, falling back on absence or a malformed value
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Ignoring malformed {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_defaults_match_documented_policy() {
        let queue = QueueConfig::default();
        assert_eq!(queue.concurrency, 5);
        assert_eq!(queue.max_attempts, 3);
        assert_eq!(queue.backoff, Duration::from_secs(1));
        assert_eq!(queue.completed_retention, Duration::from_secs(86_400));
        assert_eq!(queue.failed_retention, Duration::from_secs(604_800));
    }

    #[test]
    fn malformed_env_value_falls_back() {
        std::env::set_var("STEPLINE_TEST_MALFORMED_PORT", "not-a-port");
        assert_eq!(env_or("STEPLINE_TEST_MALFORMED_PORT", 3004u16), 3004);
        assert_eq!(env_or("STEPLINE_TEST_UNSET_KEY", 7u32), 7);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn malformed_env_value_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        std::env::set_var("STEPLINE_TEST_MALFORMED_LIMIT", "lots");

        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(env_or("STEPLINE_TEST_MALFORMED_LIMIT", 5usize), 5);
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Ignoring malformed STEPLINE_TEST_MALFORMED_LIMIT=lots"));
    }
}
