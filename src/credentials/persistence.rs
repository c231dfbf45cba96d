//! Durable form of the credential pool.
//!
//! This is the only place secrets are written to disk. The blob holds, per
//! service, the quota config and the full record list:
//!
//! ```json
//! { "version": 1, "saved_at": 1700000000000,
//!   "services": { "groq": { "config": { "requests_per_credential": 100,
//!                                       "rotation_period_secs": 86400 },
//!                           "records": [ { "secret": "...", "label": "primary", ... } ] } } }
//! ```
//!
//! The blob holds full secrets. Use [`FileBlobStore::private`] for it,
//! which writes the file with mode `0600` on Unix.
//!
//! [`FileBlobStore::private`]: crate::storage::FileBlobStore::private

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::pool::ServicePool;
use crate::storage::BlobStore;
use crate::{MimirError, Result};

/// Current blob format version.
pub const POOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PoolSnapshot {
    version: u32,
    saved_at: u64,
    services: BTreeMap<String, ServicePool>,
}

#[derive(Serialize)]
struct PoolSnapshotRef<'a> {
    version: u32,
    saved_at: u64,
    services: &'a BTreeMap<String, ServicePool>,
}

/// Serialize and write the full pool.
pub async fn save(
    store: &dyn BlobStore,
    services: &BTreeMap<String, ServicePool>,
    now: u64,
) -> Result<()> {
    let bytes = encode(services, now)?;
    store.save(&bytes).await
}

/// Read the pool. `Ok(None)` if nothing was ever written.
pub async fn load(store: &dyn BlobStore) -> Result<Option<BTreeMap<String, ServicePool>>> {
    match store.load().await? {
        Some(bytes) => decode(&bytes).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn encode(services: &BTreeMap<String, ServicePool>, now: u64) -> Result<Vec<u8>> {
    let snapshot = PoolSnapshotRef {
        version: POOL_VERSION,
        saved_at: now,
        services,
    };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<BTreeMap<String, ServicePool>> {
    let snapshot: PoolSnapshot = serde_json::from_slice(bytes)?;
    if snapshot.version > POOL_VERSION {
        return Err(MimirError::StorageUnavailable(format!(
            "unsupported credential pool version {} (max supported: {POOL_VERSION})",
            snapshot.version
        )));
    }

    let mut services = snapshot.services;
    for (name, pool) in services.iter_mut() {
        let mut seen = HashSet::new();
        let before = pool.records.len();
        pool.records.retain(|r| seen.insert(r.secret.clone()));
        if pool.records.len() != before {
            warn!(
                service = %name,
                dropped = before - pool.records.len(),
                "duplicate credentials in persisted pool"
            );
        }
    }
    Ok(services)
}
