//! Cache store contract
//!
//! A cache store persists computed whole-unit window values keyed by
//! (visualization type, concept, window start, parameter hash). It is
//! append-only: there is no update-in-place and no delete. Entries leave the
//! store only through an external retention policy.

use crate::error::CacheError;
use crate::params::Params;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A stored window value with access metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Store-assigned entry id
    pub id: String,
    /// Visualization type that produced the value
    pub cache_type: String,
    /// Parameter hash the value was computed under
    pub hash_key: String,
    /// Start of the whole-unit window
    pub window_start: NaiveDate,
    /// Concept token the value belongs to
    pub concept_id: String,
    /// Opaque computed value
    pub value: Value,
    /// Last time the entry was written or read
    pub last_use: DateTime<Utc>,
    /// Number of writes plus reads
    pub used: u64,
}

impl CacheEntry {
    /// Create a fresh entry with a new id
    pub fn new(
        cache_type: &str,
        hash_key: &str,
        window_start: NaiveDate,
        concept_id: &str,
        value: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cache_type: cache_type.to_string(),
            hash_key: hash_key.to_string(),
            window_start,
            concept_id: concept_id.to_string(),
            value,
            last_use: Utc::now(),
            used: 1,
        }
    }
}

/// Entries grouped by concept id
pub type CacheLookup = HashMap<String, Vec<CacheEntry>>;

/// Core trait for window cache backends
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn store_id(&self) -> &str;

    /// Fetch entries for the given concepts whose window start lies in
    /// `start..=end`, matching `cache_type` and the parameter hash
    ///
    /// Concepts with no entries are absent from the result. An empty concept
    /// list returns an empty map.
    async fn lookup(
        &self,
        cache_type: &str,
        concept_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
        params: &Params,
    ) -> Result<CacheLookup, CacheError>;

    /// Append a new entry
    ///
    /// Never updates an existing entry; concurrent stores for the same key
    /// may leave duplicates.
    async fn store(
        &self,
        cache_type: &str,
        concept_id: &str,
        window_start: NaiveDate,
        params: &Params,
        value: &Value,
    ) -> Result<(), CacheError>;

    /// Record a read: refresh `last_use` and increment `used`
    async fn touch(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Operation counters
    fn stats(&self) -> CacheStoreStats;
}

/// Cache store operation counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStoreStats {
    /// Lookups served
    pub lookups: u64,
    /// Entries appended
    pub stores: u64,
    /// Touches applied
    pub touches: u64,
    /// Operations that failed
    pub failures: u64,
}
