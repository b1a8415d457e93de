//! Redis cache backend
//!
//! Persists window cache entries in Redis: one HASH per entry plus one sorted
//! set per (visualization type, parameter hash, concept) indexing entries by
//! window start. Retention is enforced with key expiry.
//!
//! # Example
//!
//! ```rust,no_run
//! use windowed_analytics::redis::{RedisCacheStore, RedisConfig};
//! use windowed_analytics::cache::CacheStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCacheStore::connect(
//!     RedisConfig::default(),
//!     "wa",
//!     Duration::from_secs(86_400),
//! )
//! .await?;
//!
//! assert_eq!(store.store_id(), "redis-cache-v1");
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod store;
pub mod util;

pub use connection::{PoolMetricsSnapshot, RedisConfig, RedisPool, RetryPolicy};
pub use store::RedisCacheStore;
