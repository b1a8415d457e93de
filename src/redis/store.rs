//! Redis-backed cache store
//!
//! # Key layout
//!
//! ```text
//! {prefix}:entry:{uuid}                  → HASH {type, hash_key, window_start, concept_id,
//!                                                value, last_use, used}
//! {prefix}:{type}:{hash}:{concept}       → ZSET(window start in epoch days → uuid)
//! ```
//!
//! Every key carries an expiry of `retention`, set on store and re-armed on
//! touch, so idle entries age out on the server. Touch never recreates an
//! expired entry. Index members whose entry is gone or unreadable are skipped
//! on lookup and pruned from the index.

use super::connection::{RedisConfig, RedisPool};
use crate::cache::{CacheEntry, CacheLookup, CacheStore, CacheStoreStats};
use crate::error::CacheError;
use crate::params::Params;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use redis::Script;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Window start as a ZSET score
pub fn day_score(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

/// Key of the HASH holding one entry
pub fn entry_key(prefix: &str, id: &str) -> String {
    format!("{}:entry:{}", prefix, id)
}

/// Touch an entry only while it still holds a value
///
/// KEYS[1] entry hash, KEYS[2] index; ARGV[1] last use, ARGV[2] ttl secs.
/// Returns 1 if touched, 0 if the entry is gone.
const TOUCH_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], 'value') == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'last_use', ARGV[1])
redis.call('HINCRBY', KEYS[1], 'used', 1)
redis.call('EXPIRE', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[2])
return 1
"#;

/// Key of the ZSET indexing entries for one (type, hash, concept)
///
/// The concept segment is percent-encoded so a `:` in a token cannot reach
/// into another index's key space.
pub fn index_key(prefix: &str, cache_type: &str, hash_key: &str, concept_id: &str) -> String {
    let concept: String = url::form_urlencoded::byte_serialize(concept_id.as_bytes()).collect();
    format!("{}:{}:{}:{}", prefix, cache_type, hash_key, concept)
}

/// Rebuild an entry from its HASH fields
///
/// Returns `Ok(None)` when the hash no longer holds an entry: either it is
/// empty (expired after the index was read) or only touch metadata is left.
pub fn parse_entry(
    id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<CacheEntry>, CacheError> {
    if !fields.contains_key("value") && !fields.contains_key("window_start") {
        return Ok(None);
    }

    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| CacheError::Deserialization(format!("entry {} lacks {}", id, name)))
    };

    let window_start = NaiveDate::parse_from_str(field("window_start")?, "%Y-%m-%d")
        .map_err(|e| CacheError::Deserialization(format!("window_start: {}", e)))?;
    let value: Value = serde_json::from_str(field("value")?)
        .map_err(|e| CacheError::Deserialization(format!("value: {}", e)))?;
    let last_use = DateTime::parse_from_rfc3339(field("last_use")?)
        .map_err(|e| CacheError::Deserialization(format!("last_use: {}", e)))?
        .with_timezone(&Utc);
    let used = field("used")?
        .parse::<u64>()
        .map_err(|e| CacheError::Deserialization(format!("used: {}", e)))?;

    Ok(Some(CacheEntry {
        id: id.to_string(),
        cache_type: field("type")?.clone(),
        hash_key: field("hash_key")?.clone(),
        window_start,
        concept_id: field("concept_id")?.clone(),
        value,
        last_use,
        used,
    }))
}

/// [`CacheStore`] persisting entries in Redis
pub struct RedisCacheStore {
    pool: Arc<RedisPool>,
    prefix: String,
    retention: Duration,
    touch_script: Script,
    lookups: AtomicU64,
    stores: AtomicU64,
    touches: AtomicU64,
    failures: AtomicU64,
}

impl RedisCacheStore {
    /// Wrap an existing pool
    pub fn new(pool: Arc<RedisPool>, prefix: impl Into<String>, retention: Duration) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            retention,
            touch_script: Script::new(TOUCH_SCRIPT),
            lookups: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            touches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Connect a new pool and wrap it
    pub async fn connect(
        config: RedisConfig,
        prefix: impl Into<String>,
        retention: Duration,
    ) -> Result<Self, CacheError> {
        let pool = RedisPool::new(config).await?;
        Ok(Self::new(Arc::new(pool), prefix, retention))
    }

    /// Key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The underlying pool
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    fn retention_secs(&self) -> i64 {
        self.retention.as_secs().max(1) as i64
    }

    fn track<T>(&self, result: Result<T, CacheError>) -> Result<T, CacheError> {
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn fetch_ids(
        &self,
        index_keys: &[String],
        min: i64,
        max: i64,
    ) -> Result<Vec<Vec<String>>, CacheError> {
        let mut pipe = redis::pipe();
        for key in index_keys {
            pipe.cmd("ZRANGEBYSCORE").arg(key).arg(min).arg(max);
        }

        self.pool
            .execute(|mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async::<Vec<Vec<String>>>(&mut conn).await }
            })
            .await
    }

    async fn fetch_entries(
        &self,
        ids: &[String],
    ) -> Result<Vec<HashMap<String, String>>, CacheError> {
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGETALL").arg(entry_key(&self.prefix, id));
        }

        self.pool
            .execute(|mut conn| {
                let pipe = pipe.clone();
                async move {
                    pipe.query_async::<Vec<HashMap<String, String>>>(&mut conn)
                        .await
                }
            })
            .await
    }

    async fn lookup_inner(
        &self,
        cache_type: &str,
        concept_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
        params: &Params,
    ) -> Result<CacheLookup, CacheError> {
        let keys: Vec<String> = concept_ids
            .iter()
            .map(|c| index_key(&self.prefix, cache_type, params.cache_key(), c))
            .collect();

        let id_lists = self.fetch_ids(&keys, day_score(start), day_score(end)).await?;

        let owners: Vec<(&String, String)> = concept_ids
            .iter()
            .zip(id_lists)
            .flat_map(|(concept, ids)| ids.into_iter().map(move |id| (concept, id)))
            .collect();
        if owners.is_empty() {
            return Ok(CacheLookup::new());
        }

        let ids: Vec<String> = owners.iter().map(|(_, id)| id.clone()).collect();
        let hashes = self.fetch_entries(&ids).await?;

        let mut result = CacheLookup::new();
        let mut dead = Vec::new();
        for ((concept, id), fields) in owners.into_iter().zip(hashes) {
            match parse_entry(&id, &fields) {
                Ok(Some(entry)) => result.entry(concept.clone()).or_default().push(entry),
                Ok(None) => {
                    debug!(entry = %id, "Skipping expired cache entry");
                    dead.push((concept, id));
                },
                Err(e) => {
                    warn!(entry = %id, error = %e, "Skipping unreadable cache entry");
                    dead.push((concept, id));
                },
            }
        }

        if !dead.is_empty() {
            let dead: Vec<(String, String)> = dead
                .into_iter()
                .map(|(concept, id)| {
                    (index_key(&self.prefix, cache_type, params.cache_key(), concept), id)
                })
                .collect();
            if let Err(e) = self.prune(&dead).await {
                warn!(entries = dead.len(), error = %e, "Failed to prune dead cache entries");
            }
        }
        Ok(result)
    }

    /// Drop dead members from their index and delete any stub hash left behind
    async fn prune(&self, dead: &[(String, String)]) -> Result<(), CacheError> {
        let mut pipe = redis::pipe();
        for (index, id) in dead {
            pipe.cmd("ZREM").arg(index).arg(id).ignore();
            pipe.cmd("DEL").arg(entry_key(&self.prefix, id)).ignore();
        }

        self.pool
            .execute(|mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async::<()>(&mut conn).await }
            })
            .await
    }

    async fn store_inner(
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
        let encoded = serde_json::to_string(&entry.value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let hash = entry_key(&self.prefix, &entry.id);
        let index = index_key(&self.prefix, cache_type, params.cache_key(), concept_id);
        let ttl = self.retention_secs();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&hash)
            .arg("type")
            .arg(&entry.cache_type)
            .arg("hash_key")
            .arg(&entry.hash_key)
            .arg("window_start")
            .arg(entry.window_start.format("%Y-%m-%d").to_string())
            .arg("concept_id")
            .arg(&entry.concept_id)
            .arg("value")
            .arg(encoded)
            .arg("last_use")
            .arg(entry.last_use.to_rfc3339())
            .arg("used")
            .arg(entry.used)
            .ignore()
            .cmd("EXPIRE")
            .arg(&hash)
            .arg(ttl)
            .ignore()
            .cmd("ZADD")
            .arg(&index)
            .arg(day_score(window_start))
            .arg(&entry.id)
            .ignore()
            .cmd("EXPIRE")
            .arg(&index)
            .arg(ttl)
            .ignore();

        self.pool
            .execute(|mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async::<()>(&mut conn).await }
            })
            .await
    }

    /// Returns whether the entry still existed
    async fn touch_inner(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let hash = entry_key(&self.prefix, &entry.id);
        let index = index_key(
            &self.prefix,
            &entry.cache_type,
            &entry.hash_key,
            &entry.concept_id,
        );
        let ttl = self.retention_secs();
        let now = Utc::now().to_rfc3339();

        let touched: i32 = self
            .pool
            .execute(|mut conn| {
                let script = self.touch_script.clone();
                let hash = hash.clone();
                let index = index.clone();
                let now = now.clone();
                async move {
                    script
                        .key(hash)
                        .key(index)
                        .arg(now)
                        .arg(ttl)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        Ok(touched == 1)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn store_id(&self) -> &str {
        "redis-cache-v1"
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
        if concept_ids.is_empty() || start > end {
            return Ok(CacheLookup::new());
        }
        let result = self
            .lookup_inner(cache_type, concept_ids, start, end, params)
            .await;
        self.track(result)
    }

    async fn store(
        &self,
        cache_type: &str,
        concept_id: &str,
        window_start: NaiveDate,
        params: &Params,
        value: &Value,
    ) -> Result<(), CacheError> {
        let result = self
            .store_inner(cache_type, concept_id, window_start, params, value)
            .await;
        if result.is_ok() {
            self.stores.fetch_add(1, Ordering::Relaxed);
        }
        self.track(result)
    }

    async fn touch(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let result = self.touch_inner(entry).await;
        match &result {
            Ok(true) => {
                self.touches.fetch_add(1, Ordering::Relaxed);
            },
            Ok(false) => debug!(entry = %entry.id, "Entry expired before touch"),
            Err(_) => {},
        }
        self.track(result.map(|_| ()))
    }

    fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
