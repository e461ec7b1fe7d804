use std::time::Duration;

use conveyor_core::broker::RetryPolicy;
use conveyor_core::worker::WorkerPoolConfig;

/// Worker process configuration loaded from environment variables.
///
/// Read once at process start; the pool never reconfigures at runtime.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SQLite URL shared with the API server.
    pub database_url: String,
    /// Queue the executors consume from.
    pub queue_name: String,
    /// Number of concurrent executors in this process.
    pub concurrency: usize,
    /// Attempt ceiling per execution, counting the first attempt.
    pub max_attempts: u32,
    /// Per-execution deadline in seconds.
    pub execution_timeout_secs: u64,
    /// How long one dequeue call blocks, in seconds.
    pub dequeue_timeout_secs: u64,
    /// Base redelivery backoff in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                        |
    /// |--------------------------|--------------------------------|
    /// | `DATABASE_URL`           | `sqlite://conveyor.db?mode=rwc`|
    /// | `QUEUE_NAME`             | `executions`                   |
    /// | `WORKER_CONCURRENCY`     | `4`                            |
    /// | `MAX_ATTEMPTS`           | `3`                            |
    /// | `EXECUTION_TIMEOUT_SECS` | `300`                          |
    /// | `DEQUEUE_TIMEOUT_SECS`   | `5`                            |
    /// | `RETRY_BASE_DELAY_MS`    | `2000`                         |
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://conveyor.db?mode=rwc".into()),
            queue_name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| "executions".into()),
            concurrency: parse_env("WORKER_CONCURRENCY", 4),
            max_attempts: parse_env("MAX_ATTEMPTS", 3),
            execution_timeout_secs: parse_env("EXECUTION_TIMEOUT_SECS", 300),
            dequeue_timeout_secs: parse_env("DEQUEUE_TIMEOUT_SECS", 5),
            retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", 2000),
        }
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            queue: self.queue_name.clone(),
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            dequeue_timeout: Duration::from_secs(self.dequeue_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.retry_base_delay_ms), 2.0)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e}")),
        Err(_) => default,
    }
}
