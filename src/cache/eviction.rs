//! Scored eviction.
//!
//! When the store grows past capacity every entry is scored and the lowest
//! scorers are removed:
//!
//! ```text
//! ttl_remaining = max(0, expires_at - now) / base_ttl
//! recency       = max(0.1, 1 - since_last_access / age)
//! score         = (hit_count + 1) * ttl_remaining * recency
//! ```
//!
//! A never-hit entry counts as fully decayed (`since_last_access = age`),
//! so it sits at the 0.1 recency floor. The combination approximates
//! LFU + LRU + TTL awareness without maintaining a priority queue.
//! Ties fall back to insertion order.

use std::collections::HashMap;

use super::entry::CacheEntry;

/// Lower bound of the recency factor.
pub const RECENCY_FLOOR: f64 = 0.1;

/// Eviction score of one entry at time `now`. Higher is more valuable.
///
/// `base_ttl` is the store's nominal TTL in milliseconds, used purely to
/// normalise remaining life.
pub fn score(entry: &CacheEntry, now: u64, base_ttl: u64) -> f64 {
    let ttl_remaining = entry.remaining(now) as f64 / base_ttl.max(1) as f64;
    (entry.hit_count as f64 + 1.0) * ttl_remaining * recency(entry, now)
}

fn recency(entry: &CacheEntry, now: u64) -> f64 {
    let age = now.saturating_sub(entry.created_at);
    let since_access = match entry.last_access_at {
        Some(at) => now.saturating_sub(at),
        None => return RECENCY_FLOOR,
    };
    if age == 0 {
        return 1.0;
    }
    (1.0 - since_access as f64 / age as f64).max(RECENCY_FLOOR)
}

/// Keys of the `count` lowest-scoring entries, lowest first.
pub fn select_victims(
    entries: &HashMap<String, CacheEntry>,
    count: usize,
    now: u64,
    base_ttl: u64,
) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f64, u64, &str)> = entries
        .values()
        .map(|e| (score(e, now, base_ttl), e.seq, e.key.as_str()))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(count)
        .map(|(_, _, key)| key.to_string())
        .collect()
}
