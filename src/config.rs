//! Configuration management
//!
//! TOML configuration with environment variable overrides and defaults that
//! work out of the box (month windows, in-memory cache).

use crate::redis::{RedisConfig, RetryPolicy};
use crate::timeline::TimeUnit;
use crate::types::DatasetBounds;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Windowing and default range
    #[serde(default)]
    pub engine: EngineConfig,

    /// Cache backend selection and retention
    #[serde(default)]
    pub cache: CacheConfig,

    /// Redis connection settings, used when the cache backend is `redis`
    #[serde(default)]
    pub redis: RedisSettings,

    /// Logging and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Windowing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Alignment unit for windows and cache entries
    #[serde(default)]
    pub time_unit: TimeUnit,

    /// Earliest dataset date assumed until bounds are refreshed
    #[serde(default = "default_min_date")]
    pub default_min_date: NaiveDate,

    /// Latest dataset date assumed until bounds are refreshed
    #[serde(default = "default_max_date")]
    pub default_max_date: NaiveDate,
}

/// Cache backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local store
    #[default]
    Memory,
    /// Shared Redis store
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(format!("Unknown cache backend: {}", other)),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Which store to use
    #[serde(default)]
    pub backend: CacheBackend,

    /// Idle time after which an entry may be purged, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

/// Redis connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    /// Server URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every key written
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum concurrent commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Record prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_min_date() -> NaiveDate { NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default() }
fn default_max_date() -> NaiveDate { NaiveDate::from_ymd_opt(2019, 8, 31).unwrap_or_default() }
fn default_retention_secs() -> u64 { 86_400 }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_key_prefix() -> String { "wa".to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 1_000 }
fn default_max_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::default(),
            default_min_date: default_min_date(),
            default_max_date: default_max_date(),
        }
    }
}

impl EngineConfig {
    /// Default bounds aligned outward to the configured unit
    pub fn default_bounds(&self) -> DatasetBounds {
        DatasetBounds::new(
            self.time_unit.start_of(self.default_min_date),
            self.time_unit.end_of(self.default_max_date),
        )
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl CacheConfig {
    /// Retention as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl RedisSettings {
    /// Connection config for a [`crate::redis::RedisPool`]
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.url.clone())
            .pool_size(self.pool_size)
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .command_timeout(Duration::from_millis(self.command_timeout_ms))
            .retry_policy(RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            })
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(unit) = std::env::var("ANALYTICS_TIME_UNIT") {
            if let Ok(u) = unit.parse() {
                self.engine.time_unit = u;
            }
        }

        if let Ok(backend) = std::env::var("ANALYTICS_CACHE_BACKEND") {
            if let Ok(b) = backend.parse() {
                self.cache.backend = b;
            }
        }
        if let Ok(retention) = std::env::var("ANALYTICS_CACHE_RETENTION_SECS") {
            if let Ok(r) = retention.parse() {
                self.cache.retention_secs = r;
            }
        }

        if let Ok(url) = std::env::var("ANALYTICS_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.default_min_date > self.engine.default_max_date {
            return Err("Default min date must not be after default max date".to_string());
        }

        if self.cache.retention_secs == 0 {
            return Err("Cache retention must be > 0".to_string());
        }

        if self.cache.backend == CacheBackend::Redis {
            if self.redis.key_prefix.is_empty() {
                return Err("Redis key prefix cannot be empty".to_string());
            }
            self.redis.to_redis_config().validate()?;
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}
