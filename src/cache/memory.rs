//! In-process cache store
//!
//! Keeps entries in memory, grouped by (type, parameter hash, concept). Useful
//! for tests and single-process deployments. Like every store it has no
//! delete path; entries live until the process exits.
//!
//! # Example
//!
//! ```rust
//! use windowed_analytics::cache::{CacheStore, InMemoryCacheStore};
//!
//! let store = InMemoryCacheStore::new();
//! assert_eq!(store.store_id(), "in-memory-v1");
//! assert_eq!(store.len(), 0);
//! ```

use super::traits::{CacheEntry, CacheLookup, CacheStore, CacheStoreStats};
use crate::error::CacheError;
use crate::params::Params;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// (cache type, parameter hash, concept id)
type EntryKey = (String, String, String);

/// Memory-backed [`CacheStore`]
pub struct InMemoryCacheStore {
    /// Entries in insertion order per key
    entries: RwLock<HashMap<EntryKey, Vec<CacheEntry>>>,
    lookups: AtomicU64,
    stores: AtomicU64,
    touches: AtomicU64,
}

impl InMemoryCacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            touches: AtomicU64::new(0),
        }
    }

    /// Total number of stored entries, duplicates included
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, for inspection
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.read().values().flatten().cloned().collect()
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn store_id(&self) -> &str {
        "in-memory-v1"
    }

    async fn lookup(
        &self,
        cache_type: &str,
        concept_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
        params: &Params,
    ) -> Result<CacheLookup, CacheError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let entries = self.entries.read();
        let mut result = CacheLookup::new();

        for concept in concept_ids {
            let key = (
                cache_type.to_string(),
                params.cache_key().to_string(),
                concept.clone(),
            );
            let Some(stored) = entries.get(&key) else {
                continue;
            };
            let matching: Vec<CacheEntry> = stored
                .iter()
                .filter(|e| e.window_start >= start && e.window_start <= end)
                .cloned()
                .collect();
            if !matching.is_empty() {
                result.insert(concept.clone(), matching);
            }
        }

        Ok(result)
    }

    async fn store(
        &self,
        cache_type: &str,
        concept_id: &str,
        window_start: NaiveDate,
        params: &Params,
        value: &Value,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(
            cache_type,
            params.cache_key(),
            window_start,
            concept_id,
            value.clone(),
        );
        let key = (
            cache_type.to_string(),
            params.cache_key().to_string(),
            concept_id.to_string(),
        );

        self.entries.write().entry(key).or_default().push(entry);
        self.stores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn touch(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = (
            entry.cache_type.clone(),
            entry.hash_key.clone(),
            entry.concept_id.clone(),
        );

        let mut entries = self.entries.write();
        if let Some(stored) = entries
            .get_mut(&key)
            .and_then(|list| list.iter_mut().find(|e| e.id == entry.id))
        {
            stored.last_use = Utc::now();
            stored.used += 1;
            self.touches.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
            failures: 0,
        }
    }
}
