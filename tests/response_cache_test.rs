//! Tests for [`ResponseCache`]: class-based TTL and scored eviction.

use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

use mimir::cache::{CacheConfig, QueryClass, QueryClassifier, QueryOptions, ResponseCache, normalize};
use mimir::{ManualClock, telemetry};

const SEC: u64 = 1_000;

fn cache_at(config: CacheConfig, start: u64) -> (ResponseCache, ManualClock) {
    let clock = ManualClock::new(start);
    let cache = ResponseCache::with_clock(config, Arc::new(clock.clone()));
    (cache, clock)
}

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_entries, 1_000);
    assert_eq!(config.factual_ttl, Duration::from_secs(7 * 24 * 3600));
    assert_eq!(config.conversational_ttl, Duration::from_secs(6 * 3600));
    assert_eq!(config.base_ttl, Duration::from_secs(24 * 3600));
    assert_eq!(config.snapshot_interval, Duration::from_secs(30 * 60));
}

#[test]
fn cache_config_builder() {
    let config = CacheConfig::new()
        .max_entries(500)
        .factual_ttl(Duration::from_secs(60))
        .conversational_ttl(Duration::from_secs(30));
    assert_eq!(config.max_entries, 500);
    assert_eq!(config.ttl_for(QueryClass::Factual), Duration::from_secs(60));
    assert_eq!(config.ttl_for(QueryClass::Conversational), Duration::from_secs(30));
}

// =========================================================================
// Lookup and expiry
// =========================================================================

#[test]
fn miss_then_hit() {
    let (cache, _clock) = cache_at(CacheConfig::default(), 0);
    assert!(cache.get("k").is_none());

    cache.put("k", json!({"text": "Paris"}), QueryClass::Factual);
    assert_eq!(cache.get("k"), Some(json!({"text": "Paris"})));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.added, 1);
    assert_eq!(stats.size, 1);
}

#[test]
fn entry_is_hidden_at_exact_expiry() {
    let config = CacheConfig::new().conversational_ttl(Duration::from_secs(10));
    let (cache, clock) = cache_at(config, 1_000 * SEC);
    cache.put("k", json!(1), QueryClass::Conversational);

    clock.set(1_010 * SEC - 1);
    assert!(cache.get("k").is_some());

    clock.set(1_010 * SEC);
    assert!(cache.get("k").is_none());
    assert_eq!(cache.stats().expired, 1);
    assert!(cache.is_empty());
}

#[test]
fn factual_queries_outlive_conversational_ones() {
    let config = CacheConfig::new()
        .factual_ttl(Duration::from_secs(100))
        .conversational_ttl(Duration::from_secs(10));
    let (cache, clock) = cache_at(config, 0);
    let classifier = QueryClassifier::new();
    let opts = QueryOptions::new();

    for query in ["What is the capital of France?", "tell me a joke"] {
        let key = normalize(query, &opts).unwrap();
        cache.put(key, json!(query), classifier.classify(query));
    }

    clock.set(50 * SEC);
    let factual = normalize("What is the capital of France?", &opts).unwrap();
    let chat = normalize("tell me a joke", &opts).unwrap();
    assert!(cache.get(&factual).is_some());
    assert!(cache.get(&chat).is_none());
}

#[test]
fn overwrite_replaces_payload_and_resets_hits() {
    let (cache, _clock) = cache_at(CacheConfig::default(), 0);
    cache.put("k", json!("old"), QueryClass::Factual);
    cache.get("k");
    cache.put("k", json!("new"), QueryClass::Factual);

    let entry = cache.peek("k").unwrap();
    assert_eq!(entry.payload, json!("new"));
    assert_eq!(entry.hit_count, 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn normalized_variants_share_an_entry() {
    let (cache, _clock) = cache_at(CacheConfig::default(), 0);
    let opts = QueryOptions::new().model("m").temperature(0.2);
    cache.put(
        normalize("Who is Ada Lovelace?", &opts).unwrap(),
        json!("mathematician"),
        QueryClass::Factual,
    );

    let variant = normalize("  who   IS ada lovelace?\n", &opts).unwrap();
    assert_eq!(cache.get(&variant), Some(json!("mathematician")));

    let other_model = normalize("Who is Ada Lovelace?", &QueryOptions::new().model("n")).unwrap();
    assert!(cache.get(&other_model).is_none());
}

#[test]
fn clear_keeps_cumulative_counters() {
    let (cache, _clock) = cache_at(CacheConfig::default(), 0);
    cache.put("a", json!(1), QueryClass::Factual);
    cache.get("a");
    cache.clear();

    let stats = cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.added, 1);
}

// =========================================================================
// Capacity and eviction
// =========================================================================

#[test]
fn size_never_exceeds_capacity() {
    let (cache, clock) = cache_at(CacheConfig::new().max_entries(5), 0);
    for i in 0..50 {
        clock.advance(Duration::from_secs(1));
        cache.put(format!("k{i}"), json!(i), QueryClass::Conversational);
        assert!(cache.len() <= 5);
    }
    assert_eq!(cache.stats().evicted, 45);
}

#[test]
fn eviction_removes_lowest_score_first() {
    let config = CacheConfig::new()
        .max_entries(3)
        .conversational_ttl(Duration::from_secs(100))
        .base_ttl(Duration::from_secs(100));
    let (cache, clock) = cache_at(config, 0);

    // a: never hit             -> score 1 * 0.5 * 0.1   = 0.05
    // b: 3 hits, last at 40s   -> score 4 * 0.5 * 0.8   = 1.6
    // c: 1 hit at 25s          -> score 2 * 0.7 * (1/6) ≈ 0.23
    cache.put("a", json!("a"), QueryClass::Conversational);
    cache.put("b", json!("b"), QueryClass::Conversational);
    clock.set(20 * SEC);
    cache.put("c", json!("c"), QueryClass::Conversational);
    clock.set(25 * SEC);
    cache.get("c");
    clock.set(40 * SEC);
    for _ in 0..3 {
        cache.get("b");
    }

    clock.set(50 * SEC);
    // d: fresh, never hit -> 1 * 1.0 * 0.1 = 0.1
    cache.put("d", json!("d"), QueryClass::Conversational);
    assert!(cache.peek("a").is_none());
    assert!(cache.peek("b").is_some());
    assert!(cache.peek("c").is_some());
    assert!(cache.peek("d").is_some());

    // e ties with d at 0.1; the older insert goes
    cache.put("e", json!("e"), QueryClass::Conversational);
    assert!(cache.peek("d").is_none());
    assert!(cache.peek("c").is_some());
    assert!(cache.peek("e").is_some());
    assert_eq!(cache.stats().evicted, 2);
}

#[test]
fn purge_expired_counts_removals() {
    let config = CacheConfig::new()
        .factual_ttl(Duration::from_secs(100))
        .conversational_ttl(Duration::from_secs(10));
    let (cache, clock) = cache_at(config, 0);
    cache.put("f", json!(1), QueryClass::Factual);
    cache.put("c1", json!(2), QueryClass::Conversational);
    cache.put("c2", json!(3), QueryClass::Conversational);

    clock.set(10 * SEC);
    assert_eq!(cache.purge_expired(), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().expired, 2);
}

// =========================================================================
// Metrics
// =========================================================================

fn counter_total(
    snapshot: &[(
        metrics_util::CompositeKey,
        Option<metrics::Unit>,
        Option<metrics::SharedString>,
        DebugValue,
    )],
    name: &str,
) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

#[test]
fn lookups_and_evictions_emit_counters() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let (cache, clock) = cache_at(CacheConfig::new().max_entries(1), 0);
        cache.put("a", json!(1), QueryClass::Factual);
        cache.get("a");
        cache.get("missing");
        clock.advance(Duration::from_secs(1));
        cache.put("b", json!(2), QueryClass::Factual);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_EVICTIONS_TOTAL), 1);
}
