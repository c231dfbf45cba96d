use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::classify::QueryClass;

/// A cached completion.
///
/// The payload is opaque; the cache never inspects it. Timestamps are
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub hit_count: u64,
    /// `None` until the first hit.
    pub last_access_at: Option<u64>,
    pub query_class: QueryClass,
    /// Insertion sequence number; eviction tie-breaker.
    #[serde(default)]
    pub seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Milliseconds of life left, zero once expired.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    pub(crate) fn record_hit(&mut self, now: u64) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_access_at = Some(now);
    }
}
