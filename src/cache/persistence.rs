//! Snapshot and reload of the response cache.
//!
//! The cache is an optimisation, never a source of truth: snapshots are
//! periodic (a crash loses at most one interval of inserts) and a reload
//! that cannot parse its blob leaves the cache empty instead of failing
//! startup.
//!
//! # Blob format
//!
//! ```json
//! { "version": 1, "saved_at": 1700000000000,
//!   "stats": { "hits": 3, "misses": 1, "added": 2, "expired": 0, "evicted": 0 },
//!   "entries": [ ["<key>", { "key": "<key>", "payload": ..., ... }] ] }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::entry::CacheEntry;
use super::store::{CacheStats, ResponseCache};
use crate::storage::BlobStore;
use crate::{MimirError, Result};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: u64,
    pub stats: CacheStats,
    pub entries: Vec<(String, CacheEntry)>,
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Entries restored into the cache.
    pub restored: usize,
    /// Entries dropped because they expired while the process was down.
    pub expired: usize,
    /// Whether a blob existed at all.
    pub found: bool,
}

/// Binds a [`ResponseCache`] to the blob store it snapshots into.
///
/// Clones share one lock, so snapshot and reload passes never overlap.
#[derive(Clone)]
pub struct CachePersistence {
    cache: Arc<ResponseCache>,
    store: Arc<dyn BlobStore>,
    pass: Arc<Mutex<()>>,
}

impl CachePersistence {
    pub fn new(cache: Arc<ResponseCache>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            cache,
            store,
            pass: Arc::new(Mutex::new(())),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Write the full entry set and cumulative counters.
    ///
    /// Expired entries are purged first so they are not written out.
    pub async fn snapshot(&self) -> Result<usize> {
        let _pass = self.pass.lock().await;
        self.cache.purge_expired();
        let (entries, stats) = self.cache.export();
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.cache.now(),
            stats,
            entries: entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
        };
        let count = snapshot.entries.len();
        let bytes = serde_json::to_vec(&snapshot)?;
        self.store.save(&bytes).await?;
        debug!(entries = count, store = %self.store.describe(), "cache snapshot written");
        Ok(count)
    }

    /// Load the last snapshot, keeping only entries still alive.
    ///
    /// Replaces the cache contents. A missing blob is a successful empty
    /// reload; an unreadable or malformed blob is an error and leaves the
    /// cache untouched, so the caller can log it and carry on empty.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _pass = self.pass.lock().await;
        let Some(bytes) = self.store.load().await? else {
            return Ok(ReloadReport::default());
        };
        let snapshot = parse_snapshot(&bytes)?;

        let now = self.cache.now();
        let mut kept = Vec::with_capacity(snapshot.entries.len());
        let mut expired = 0usize;
        for (key, mut entry) in snapshot.entries {
            if entry.is_expired(now) {
                expired += 1;
                continue;
            }
            entry.key = key;
            kept.push(entry);
        }

        let mut stats = snapshot.stats;
        stats.expired += expired as u64;
        let restored = self.cache.restore(kept, stats);

        info!(
            restored,
            expired,
            source = %self.store.describe(),
            "reloaded response cache"
        );
        Ok(ReloadReport {
            restored,
            expired,
            found: true,
        })
    }
}

fn parse_snapshot(bytes: &[u8]) -> Result<CacheSnapshot> {
    let snapshot: CacheSnapshot = serde_json::from_slice(bytes)?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(MimirError::StorageUnavailable(format!(
            "unsupported cache snapshot version {} (max supported: {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    Ok(snapshot)
}
