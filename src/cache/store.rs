//! In-memory response cache with class-based TTL and scored eviction.
//!
//! [`ResponseCache`] maps cache keys (see [`key`](super::key)) to
//! [`CacheEntry`] values. Lookups never return an expired entry: expiry is
//! checked on every `get` and stale entries are purged on the spot. When an
//! insert pushes the store past `max_entries`, the
//! [`eviction`](super::eviction) policy removes the lowest-scoring entries.
//!
//! None of the operations here suspend; the internal mutex is never held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::classify::QueryClass;
use super::entry::CacheEntry;
use super::eviction;
use crate::clock::{self, SharedClock};
use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use mimir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .factual_ttl(Duration::from_secs(3 * 24 * 3600))
///     .conversational_ttl(Duration::from_secs(2 * 3600));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction. Default: 1,000.
    pub max_entries: usize,
    /// TTL for factual queries. Default: 7 days.
    pub factual_ttl: Duration,
    /// TTL for conversational queries. Default: 6 hours.
    pub conversational_ttl: Duration,
    /// Nominal TTL used to normalise eviction scores. Default: 24 hours.
    pub base_ttl: Duration,
    /// Interval between background snapshots. Default: 30 minutes.
    pub snapshot_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            factual_ttl: Duration::from_secs(7 * 24 * 3600),
            conversational_ttl: Duration::from_secs(6 * 3600),
            base_ttl: Duration::from_secs(24 * 3600),
            snapshot_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the TTL for factual queries.
    pub fn factual_ttl(mut self, ttl: Duration) -> Self {
        self.factual_ttl = ttl;
        self
    }

    /// Set the TTL for conversational queries.
    pub fn conversational_ttl(mut self, ttl: Duration) -> Self {
        self.conversational_ttl = ttl;
        self
    }

    /// Set the eviction normalisation TTL.
    pub fn base_ttl(mut self, ttl: Duration) -> Self {
        self.base_ttl = ttl;
        self
    }

    /// Set the background snapshot interval.
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// TTL applied to entries of `class`.
    pub fn ttl_for(&self, class: QueryClass) -> Duration {
        match class {
            QueryClass::Factual => self.factual_ttl,
            QueryClass::Conversational => self.conversational_ttl,
        }
    }
}

/// Cache counters.
///
/// `size` is the live entry count; the rest are cumulative and survive
/// [`ResponseCache::clear`] and snapshot/reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(default)]
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub added: u64,
    pub expired: u64,
    #[serde(default)]
    pub evicted: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    next_seq: u64,
}

impl Inner {
    fn remove_expired(&mut self, key: &str) {
        self.entries.remove(key);
        self.stats.expired += 1;
        metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL).increment(1);
    }
}

/// Bounded in-memory response cache.
pub struct ResponseCache {
    config: CacheConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    /// Create an empty cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    /// Create an empty cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a payload.
    ///
    /// Returns `None` when the key is absent or expired; an expired entry
    /// is removed and counted in `expired`. A hit bumps the entry's hit
    /// count and last-access time.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.record_hit(now);
                let payload = entry.payload.clone();
                inner.stats.hits += 1;
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                return Some(payload);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!(key = %short(key), "cache entry expired");
            inner.remove_expired(key);
        }
        inner.stats.misses += 1;
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        None
    }

    /// Insert or overwrite an entry, evicting if the store is over capacity.
    pub fn put(&self, key: impl Into<String>, payload: Value, query_class: QueryClass) {
        let key = key.into();
        let now = self.now();
        let ttl = clock::millis(self.config.ttl_for(query_class));
        let mut inner = self.lock();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            created_at: now,
            expires_at: now.saturating_add(ttl),
            hit_count: 0,
            last_access_at: None,
            query_class,
            seq,
        };
        inner.entries.insert(key, entry);
        inner.stats.added += 1;

        if inner.entries.len() > self.config.max_entries {
            self.evict(&mut inner, now);
        }
    }

    fn evict(&self, inner: &mut Inner, now: u64) {
        let excess = inner.entries.len() - self.config.max_entries;
        let base_ttl = clock::millis(self.config.base_ttl);
        for key in eviction::select_victims(&inner.entries, excess, now, base_ttl) {
            if let Some(victim) = inner.entries.remove(&key) {
                inner.stats.evicted += 1;
                metrics::counter!(
                    telemetry::CACHE_EVICTIONS_TOTAL,
                    "class" => victim.query_class.as_str()
                )
                .increment(1);
                debug!(key = %short(&key), hits = victim.hit_count, "evicted cache entry");
            }
        }
    }

    /// Remove every entry. Cumulative counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Housekeeping pass: drop every expired entry. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = self.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let purged = before - inner.entries.len();
        if purged > 0 {
            inner.stats.expired += purged as u64;
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL).increment(purged as u64);
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inspect an entry without touching hit accounting or expiry.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// All entries in insertion order, plus cumulative counters.
    pub(crate) fn export(&self) -> (Vec<CacheEntry>, CacheStats) {
        let inner = self.lock();
        let mut entries: Vec<CacheEntry> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        let stats = CacheStats {
            size: entries.len(),
            ..inner.stats
        };
        (entries, stats)
    }

    /// Replace contents with reloaded entries and counters.
    ///
    /// A snapshot written under a larger capacity is trimmed to
    /// `max_entries` by the usual eviction policy. Returns the number of
    /// entries kept.
    pub(crate) fn restore(&self, entries: Vec<CacheEntry>, stats: CacheStats) -> usize {
        let now = self.now();
        let mut inner = self.lock();
        inner.next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        inner.entries = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        inner.stats = stats;
        if inner.entries.len() > self.config.max_entries {
            self.evict(&mut inner, now);
        }
        let size = inner.entries.len();
        inner.stats.size = size;
        size
    }
}

/// Key prefix for logs. Falls back to the whole key when byte 8 is not a
/// char boundary.
fn short(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn cache(config: CacheConfig) -> (ResponseCache, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (ResponseCache::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn miss_then_hit() {
        let (cache, _) = cache(CacheConfig::default());
        assert!(cache.get("k").is_none());
        cache.put("k", json!({"text": "hi"}), QueryClass::Conversational);
        assert_eq!(cache.get("k"), Some(json!({"text": "hi"})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn hit_accounting() {
        let (cache, clock) = cache(CacheConfig::default());
        cache.put("k", json!(1), QueryClass::Factual);
        assert_eq!(cache.peek("k").unwrap().last_access_at, None);

        clock.advance(Duration::from_secs(5));
        cache.get("k");
        cache.get("k");
        let entry = cache.peek("k").unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.last_access_at, Some(1_005_000));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (cache, clock) = cache(CacheConfig::new().conversational_ttl(Duration::from_secs(10)));
        cache.put("k", json!(1), QueryClass::Conversational);

        clock.advance(Duration::from_millis(9_999));
        assert!(cache.get("k").is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get("k").is_none());
        assert!(cache.peek("k").is_none(), "expired entry is purged");
        assert_eq!(cache.stats().expired, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn factual_outlives_conversational() {
        let (cache, _) = cache(CacheConfig::default());
        cache.put("f", json!(1), QueryClass::Factual);
        cache.put("c", json!(1), QueryClass::Conversational);
        let f = cache.peek("f").unwrap();
        let c = cache.peek("c").unwrap();
        assert!(f.expires_at - f.created_at > c.expires_at - c.created_at);
        assert_eq!(f.expires_at - f.created_at, 7 * 24 * 3600 * 1000);
    }

    #[test]
    fn overwrite_resets_entry() {
        let (cache, _) = cache(CacheConfig::default());
        cache.put("k", json!("old"), QueryClass::Conversational);
        cache.get("k");
        cache.put("k", json!("new"), QueryClass::Factual);
        let entry = cache.peek("k").unwrap();
        assert_eq!(entry.payload, json!("new"));
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.query_class, QueryClass::Factual);
        assert_eq!(cache.stats().added, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_keeps_counters() {
        let (cache, _) = cache(CacheConfig::default());
        cache.put("a", json!(1), QueryClass::Conversational);
        cache.get("a");
        cache.get("b");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.added, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let (cache, clock) = cache(CacheConfig::new().max_entries(3));
        for i in 0..10 {
            cache.put(format!("k{i}"), json!(i), QueryClass::Conversational);
            clock.advance(Duration::from_secs(1));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.stats().evicted, 7);
    }

    #[test]
    fn purge_expired_counts() {
        let (cache, clock) = cache(CacheConfig::new().conversational_ttl(Duration::from_secs(1)));
        cache.put("a", json!(1), QueryClass::Conversational);
        cache.put("b", json!(1), QueryClass::Factual);
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().expired, 1);
        assert!(cache.peek("b").is_some());
    }

    #[test]
    fn export_is_insertion_ordered() {
        let (cache, _) = cache(CacheConfig::default());
        for k in ["c", "a", "b"] {
            cache.put(k, json!(k), QueryClass::Conversational);
        }
        let (entries, stats) = cache.export();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["c", "a", "b"]);
        assert_eq!(stats.size, 3);
    }

    #[test]
    fn short_prefix_respects_char_boundaries() {
        assert_eq!(short("0123456789abcdef"), "01234567");
        assert_eq!(short("abc"), "abc");
        // 'é' occupies bytes 7..9
        assert_eq!(short("abcdefgé-tail"), "abcdefgé-tail");
    }

    #[test]
    fn restore_trims_to_capacity() {
        let (big, _) = cache(CacheConfig::default());
        for k in ["a", "b", "c", "d", "e"] {
            big.put(k, json!(k), QueryClass::Factual);
        }
        big.get("e");
        let (entries, stats) = big.export();

        let (small, _) = cache(CacheConfig::new().max_entries(2));
        assert_eq!(small.restore(entries, stats), 2);
        assert_eq!(small.len(), 2);
        assert!(small.peek("e").is_some());
        assert_eq!(small.stats().evicted, 3);
        assert_eq!(small.stats().size, 2);
    }
}
