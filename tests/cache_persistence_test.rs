//! Tests for cache snapshot and reload.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mimir::cache::{CacheConfig, CachePersistence, QueryClass, ResponseCache};
use mimir::{BlobStore, FileBlobStore, ManualClock, MemoryBlobStore};

const SEC: u64 = 1_000;

fn config() -> CacheConfig {
    CacheConfig::new()
        .factual_ttl(Duration::from_secs(1_000))
        .conversational_ttl(Duration::from_secs(10))
}

fn persistence(store: Arc<dyn BlobStore>, clock: &ManualClock) -> CachePersistence {
    let cache = Arc::new(ResponseCache::with_clock(config(), Arc::new(clock.clone())));
    CachePersistence::new(cache, store)
}

#[tokio::test]
async fn snapshot_then_reload_restores_entries_and_counters() {
    let clock = ManualClock::new(0);
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    let first = persistence(Arc::clone(&store), &clock);
    first.cache().put("a", json!({"text": "a"}), QueryClass::Factual);
    first.cache().put("b", json!({"text": "b"}), QueryClass::Factual);
    first.cache().get("a");
    first.cache().get("missing");
    assert_eq!(first.snapshot().await.unwrap(), 2);

    let second = persistence(store, &clock);
    let report = second.reload().await.unwrap();
    assert!(report.found);
    assert_eq!(report.restored, 2);
    assert_eq!(report.expired, 0);

    let cache = second.cache();
    assert_eq!(cache.peek("a").unwrap().hit_count, 1);
    assert_eq!(cache.get("b"), Some(json!({"text": "b"})));
    let stats = cache.stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.added, 2);
    // one restored hit plus the lookup above
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn reload_is_idempotent() {
    let clock = ManualClock::new(0);
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let p = persistence(Arc::clone(&store), &clock);
    p.cache().put("a", json!(1), QueryClass::Factual);
    p.snapshot().await.unwrap();

    let reloaded = persistence(store, &clock);
    reloaded.reload().await.unwrap();
    let once = (reloaded.cache().stats(), reloaded.cache().peek("a"));
    reloaded.reload().await.unwrap();
    let twice = (reloaded.cache().stats(), reloaded.cache().peek("a"));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn entries_expired_while_down_are_dropped_and_counted() {
    let clock = ManualClock::new(0);
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let p = persistence(Arc::clone(&store), &clock);
    p.cache().put("fact", json!(1), QueryClass::Factual);
    p.cache().put("chat", json!(2), QueryClass::Conversational);
    p.snapshot().await.unwrap();

    clock.set(60 * SEC);
    let reloaded = persistence(store, &clock);
    let report = reloaded.reload().await.unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(report.expired, 1);
    assert!(reloaded.cache().peek("chat").is_none());
    assert_eq!(reloaded.cache().stats().expired, 1);
}

#[tokio::test]
async fn snapshot_skips_expired_entries() {
    let clock = ManualClock::new(0);
    let store = Arc::new(MemoryBlobStore::new());
    let p = persistence(store.clone(), &clock);
    p.cache().put("fact", json!(1), QueryClass::Factual);
    p.cache().put("chat", json!(2), QueryClass::Conversational);

    clock.set(20 * SEC);
    assert_eq!(p.snapshot().await.unwrap(), 1);
    let raw: serde_json::Value = serde_json::from_slice(&store.contents().unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_blob_is_empty_reload() {
    let clock = ManualClock::new(0);
    let p = persistence(Arc::new(MemoryBlobStore::new()), &clock);
    let report = p.reload().await.unwrap();
    assert!(!report.found);
    assert!(p.cache().is_empty());
}

#[tokio::test]
async fn corrupt_blob_is_an_error_and_leaves_cache_alone() {
    let clock = ManualClock::new(0);
    let p = persistence(Arc::new(MemoryBlobStore::with_contents("{not json")), &clock);
    p.cache().put("live", json!(1), QueryClass::Factual);

    assert!(p.reload().await.is_err());
    assert!(p.cache().peek("live").is_some());
}

#[tokio::test]
async fn failed_write_surfaces_storage_error() {
    let clock = ManualClock::new(0);
    let store = Arc::new(MemoryBlobStore::new());
    store.fail_writes(true);
    let p = persistence(store, &clock);
    p.cache().put("a", json!(1), QueryClass::Factual);

    let err = p.snapshot().await.unwrap_err();
    assert!(err.is_storage());
    // the in-memory cache is unaffected
    assert_eq!(p.cache().len(), 1);
}

#[tokio::test]
async fn file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.json");
    let clock = ManualClock::new(0);

    let p = persistence(Arc::new(FileBlobStore::new(&path)), &clock);
    p.cache().put("a", json!("persisted"), QueryClass::Factual);
    p.snapshot().await.unwrap();
    assert!(path.exists());

    let reloaded = persistence(Arc::new(FileBlobStore::new(&path)), &clock);
    assert_eq!(reloaded.reload().await.unwrap().restored, 1);
    assert_eq!(reloaded.cache().get("a"), Some(json!("persisted")));
}
