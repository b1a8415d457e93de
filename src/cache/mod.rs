//! Window value caching
//!
//! Whole-unit window values are cached per (visualization type, concept,
//! window start, parameter hash). Partial windows are never cached.
//!
//! Two backends ship with the crate:
//!
//! - [`InMemoryCacheStore`]: process-local, for tests and single instances
//! - [`crate::redis::RedisCacheStore`]: shared, with TTL-based retention

pub mod memory;
pub mod traits;

pub use memory::InMemoryCacheStore;
pub use traits::{CacheEntry, CacheLookup, CacheStore, CacheStoreStats};
