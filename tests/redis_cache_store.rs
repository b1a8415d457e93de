//! Round-trip tests for the Redis cache store
//!
//! These tests need a running Redis server (`REDIS_URL`, default
//! `redis://127.0.0.1:6379`). Every test works under its own key prefix.
//!
//! Run with: cargo test --test redis_cache_store -- --ignored

use chrono::NaiveDate;
use redis::aio::MultiplexedConnection;
use serde_json::{json, Map};
use std::time::Duration;
use windowed_analytics::cache::CacheStore;
use windowed_analytics::params::{FilterField, FilterSchema, Params};
use windowed_analytics::redis::store::{entry_key, index_key};
use windowed_analytics::redis::{RedisCacheStore, RedisConfig};

// =============================================================================
// Fixtures
// =============================================================================

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn params(kind: &str) -> Params {
    let schema = FilterSchema::new().field(FilterField::new("type"));
    let mut filter = Map::new();
    filter.insert("type".to_string(), json!(kind));
    Params::resolve(&filter, &schema)
}

async fn store() -> RedisCacheStore {
    let prefix = format!("wa-test-{}", uuid::Uuid::new_v4());
    RedisCacheStore::connect(
        RedisConfig::with_url(redis_url()),
        prefix,
        Duration::from_secs(300),
    )
    .await
    .unwrap()
}

async fn raw_connection() -> MultiplexedConnection {
    redis::Client::open(redis_url())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

// =============================================================================
// Round trips
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_lookup_filters_by_window_range() {
    let store = store().await;
    let p = params("stated");

    for month in 1..=4 {
        store
            .store("count", "1", date(2019, month, 1), &p, &json!({ "total": month }))
            .await
            .unwrap();
    }

    let found = store
        .lookup("count", &["1".to_string()], date(2019, 2, 1), date(2019, 3, 1), &p)
        .await
        .unwrap();

    let mut starts: Vec<NaiveDate> = found["1"].iter().map(|e| e.window_start).collect();
    starts.sort();
    assert_eq!(starts, vec![date(2019, 2, 1), date(2019, 3, 1)]);
    assert_eq!(store.stats().stores, 4);
}

#[tokio::test]
#[ignore]
async fn test_lookup_groups_by_concept_and_params() {
    let store = store().await;
    let stated = params("stated");
    let inferred = params("inferred");
    let feb = date(2019, 2, 1);

    store.store("count", "1", feb, &stated, &json!(1)).await.unwrap();
    store.store("count", "!1", feb, &stated, &json!(2)).await.unwrap();
    store.store("count", "2", feb, &inferred, &json!(3)).await.unwrap();
    store.store("unique", "1", feb, &stated, &json!(4)).await.unwrap();

    let concepts = vec!["1".to_string(), "!1".to_string(), "2".to_string()];
    let found = store
        .lookup("count", &concepts, feb, feb, &stated)
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found["1"][0].value, json!(1));
    assert_eq!(found["!1"][0].value, json!(2));
    assert_eq!(found["!1"][0].concept_id, "!1");
    assert!(!found.contains_key("2"));
}

#[tokio::test]
#[ignore]
async fn test_touch_increments_use_count() {
    let store = store().await;
    let p = params("stated");
    let feb = date(2019, 2, 1);
    let concepts = vec!["1".to_string()];

    store.store("count", "1", feb, &p, &json!(9)).await.unwrap();
    let entry = store.lookup("count", &concepts, feb, feb, &p).await.unwrap()["1"][0].clone();
    assert_eq!(entry.used, 1);

    store.touch(&entry).await.unwrap();
    store.touch(&entry).await.unwrap();

    let found = store.lookup("count", &concepts, feb, feb, &p).await.unwrap();
    let touched = &found["1"][0];
    assert_eq!(touched.used, 3);
    assert!(touched.last_use >= entry.last_use);
    assert_eq!(touched.value, json!(9));
    assert_eq!(store.stats().touches, 2);
}

#[tokio::test]
#[ignore]
async fn test_racing_stores_leave_duplicates() {
    let store = store().await;
    let p = params("stated");
    let feb = date(2019, 2, 1);

    let v1 = json!(5);
    let v2 = json!(5);
    let (a, b) = tokio::join!(
        store.store("count", "1", feb, &p, &v1),
        store.store("count", "1", feb, &p, &v2),
    );
    a.unwrap();
    b.unwrap();

    let found = store
        .lookup("count", &["1".to_string()], feb, feb, &p)
        .await
        .unwrap();
    assert_eq!(found["1"].len(), 2);
    assert_ne!(found["1"][0].id, found["1"][1].id);
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_touch_after_expiry_does_not_resurrect_entry() {
    let store = store().await;
    let p = params("stated");
    let feb = date(2019, 2, 1);
    let concepts = vec!["1".to_string(), "2".to_string()];

    store.store("count", "1", feb, &p, &json!(1)).await.unwrap();
    store.store("count", "2", feb, &p, &json!(2)).await.unwrap();
    let found = store.lookup("count", &concepts, feb, feb, &p).await.unwrap();
    let expired = found["1"][0].clone();

    // Entry hash expires between lookup and the detached touch
    let mut conn = raw_connection().await;
    let hash = entry_key(store.prefix(), &expired.id);
    redis::cmd("DEL")
        .arg(&hash)
        .query_async::<()>(&mut conn)
        .await
        .unwrap();

    store.touch(&expired).await.unwrap();
    let exists: bool = redis::cmd("EXISTS")
        .arg(&hash)
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!exists);
    assert_eq!(store.stats().touches, 0);

    // The sibling concept sharing the batch is still served
    let found = store.lookup("count", &concepts, feb, feb, &p).await.unwrap();
    assert!(!found.contains_key("1"));
    assert_eq!(found["2"][0].value, json!(2));
}

#[tokio::test]
#[ignore]
async fn test_lookup_skips_and_prunes_unreadable_entries() {
    let store = store().await;
    let p = params("stated");
    let feb = date(2019, 2, 1);
    let concepts = vec!["1".to_string(), "2".to_string()];

    store.store("count", "1", feb, &p, &json!(1)).await.unwrap();
    store.store("count", "2", feb, &p, &json!(2)).await.unwrap();
    let stale = store.lookup("count", &concepts, feb, feb, &p).await.unwrap()["1"][0].clone();

    // Leave only touch metadata behind, as an unguarded touch after expiry would
    let mut conn = raw_connection().await;
    let hash = entry_key(store.prefix(), &stale.id);
    redis::cmd("DEL")
        .arg(&hash)
        .query_async::<()>(&mut conn)
        .await
        .unwrap();
    redis::cmd("HSET")
        .arg(&hash)
        .arg("last_use")
        .arg("2019-03-01T00:00:00+00:00")
        .arg("used")
        .arg(2)
        .query_async::<()>(&mut conn)
        .await
        .unwrap();

    let found = store.lookup("count", &concepts, feb, feb, &p).await.unwrap();
    assert!(!found.contains_key("1"));
    assert_eq!(found["2"][0].value, json!(2));

    let index = index_key(store.prefix(), "count", p.cache_key(), "1");
    let members: Vec<String> = redis::cmd("ZRANGE")
        .arg(&index)
        .arg(0)
        .arg(-1)
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!members.contains(&stale.id));
    let exists: bool = redis::cmd("EXISTS")
        .arg(&hash)
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!exists);
}
