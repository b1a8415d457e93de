//! Redis connection handling with command timeouts and retry
//!
//! A single multiplexed connection is shared by all callers; a semaphore caps
//! the number of commands in flight. Failed commands are retried with
//! exponential backoff when the failure looks transient.
//!
//! # Example
//!
//! ```rust,no_run
//! use windowed_analytics::redis::{RedisConfig, RedisPool};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::with_url("redis://localhost:6379")
//!     .pool_size(8)
//!     .command_timeout(Duration::from_millis(500));
//!
//! let pool = RedisPool::new(config).await?;
//! let pong: String = pool
//!     .execute(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
//!     .await?;
//! assert_eq!(pong, "PONG");
//! # Ok(())
//! # }
//! ```

use super::util::safe_redis_error;
use crate::error::CacheError;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

/// Connection settings for a [`RedisPool`]
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of concurrent commands
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing a connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for a single command or pipeline
    /// Default: 1 second
    pub command_timeout: Duration,

    /// Retry policy for transient failures
    pub retry_policy: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    /// Create a config for the given URL with default limits
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the number of concurrent commands
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err("Redis URL must use the redis:// or rediss:// scheme".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size cannot exceed 1000".to_string());
        }
        if self.command_timeout.is_zero() {
            return Err("Command timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Exponential backoff for retried commands
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry
    /// Default: 50ms
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    /// Default: 2 seconds
    pub max_delay: Duration,

    /// Backoff multiplier
    /// Default: 2.0
    pub multiplier: f64,

    /// Add up to 25% random jitter
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Counters for pool activity
#[derive(Debug, Default)]
struct PoolCounters {
    connections: AtomicU64,
    commands: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    latency_us: AtomicU64,
}

/// Snapshot of pool activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolMetricsSnapshot {
    /// Connections established, reconnects included
    pub connections: u64,
    /// Commands that succeeded
    pub commands: u64,
    /// Attempts that failed or timed out
    pub failures: u64,
    /// Retries issued
    pub retries: u64,
    /// Mean latency of successful commands, in microseconds
    pub average_latency_us: f64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolMetricsSnapshot {
        let commands = self.commands.load(Ordering::Relaxed);
        let latency = self.latency_us.load(Ordering::Relaxed);
        PoolMetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            commands,
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_us: if commands == 0 {
                0.0
            } else {
                latency as f64 / commands as f64
            },
        }
    }
}

/// Shared Redis connection with bounded concurrency
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    counters: PoolCounters,
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Validate the config and establish the initial connection
    pub async fn new(config: RedisConfig) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::Connection)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Connection(safe_redis_error(&config.url, &e)))?;

        let pool = Self {
            client,
            connection: RwLock::new(None),
            semaphore: Arc::new(Semaphore::new(config.pool_size as usize)),
            counters: PoolCounters::default(),
            config,
        };

        pool.connect().await?;
        debug!(server = ?super::util::target(&pool.config.url), "Redis pool ready");
        Ok(pool)
    }

    async fn connect(&self) -> Result<MultiplexedConnection, CacheError> {
        let started = Instant::now();

        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Connection("Connection timeout".to_string()))?
        .map_err(|e| CacheError::Connection(safe_redis_error(&self.config.url, &e)))?;

        *self.connection.write().await = Some(conn.clone());
        self.counters.connections.fetch_add(1, Ordering::Relaxed);

        debug!(elapsed = ?started.elapsed(), "Redis connection established");
        Ok(conn)
    }

    async fn current(&self) -> Result<MultiplexedConnection, CacheError> {
        let existing = self.connection.read().await.clone();
        match existing {
            Some(conn) => Ok(conn),
            None => self.connect().await,
        }
    }

    /// Run a command with timeout and retry
    ///
    /// `f` receives a clone of the shared connection and may be invoked more
    /// than once.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, CacheError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CacheError::Connection("Pool closed".to_string()))?;

        let policy = &self.config.retry_policy;
        let mut attempt = 0;

        loop {
            let conn = self.current().await?;
            let started = Instant::now();

            let failure = match tokio::time::timeout(self.config.command_timeout, f(conn)).await {
                Ok(Ok(value)) => {
                    self.counters.commands.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .latency_us
                        .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                    return Ok(value);
                },
                Ok(Err(e)) => Some(e),
                Err(_) => None,
            };

            self.counters.failures.fetch_add(1, Ordering::Relaxed);

            let retriable = failure.as_ref().map_or(true, is_retriable_error);
            if !retriable || !policy.should_retry(attempt) {
                return Err(match failure {
                    Some(e) => CacheError::Command(safe_redis_error(&self.config.url, &e)),
                    None => CacheError::Command("Command timeout".to_string()),
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(attempt = attempt + 1, ?delay, "Redis command failed, retrying");
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;

            if failure.as_ref().is_some_and(is_connection_error) {
                *self.connection.write().await = None;
            }
            attempt += 1;
        }
    }

    /// Activity counters
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.counters.snapshot()
    }

    /// The pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.pool_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(RedisConfig::with_url("").validate().is_err());
        assert!(RedisConfig::with_url("http://localhost").validate().is_err());
        assert!(RedisConfig::with_url("redis://localhost")
            .pool_size(0)
            .validate()
            .is_err());
        assert!(RedisConfig::with_url("redis://localhost")
            .pool_size(1001)
            .validate()
            .is_err());
        assert!(RedisConfig::with_url("redis://localhost")
            .command_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RedisConfig::with_url("rediss://localhost:6380").validate().is_ok());
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_jitter_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            jitter: true,
            ..Default::default()
        };
        for _ in 0..20 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::none().should_retry(0));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.commands.fetch_add(2, Ordering::Relaxed);
        counters.latency_us.fetch_add(300, Ordering::Relaxed);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.commands, 2);
        assert_eq!(snapshot.average_latency_us, 150.0);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let result = RedisPool::new(RedisConfig::with_url("redis://localhost").pool_size(0)).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }
}
