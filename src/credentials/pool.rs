//! Per-service credential pools with quota-aware selection.
//!
//! Every mutation (add, remove, enable/disable, selection, quota reset)
//! writes the whole pool to its blob store before returning. The pool lock
//! is held across that write so the on-disk order of updates matches the
//! in-memory order. A failed write is logged and counted; the in-memory
//! state stays authoritative for the rest of the process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::persistence;
use super::record::{CredentialRecord, KeySummary};
use crate::clock::{self, SharedClock};
use crate::storage::BlobStore;
use crate::telemetry;
use crate::{MimirError, Result};

/// Quota settings for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Requests each credential may serve per rotation window. Default: 100.
    pub requests_per_credential: u64,
    /// Window after which every usage counter resets. Default: 24 hours.
    #[serde(rename = "rotation_period_secs", with = "clock::serde_secs")]
    pub rotation_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            requests_per_credential: 100,
            rotation_period: Duration::from_secs(24 * 3600),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_per_credential(mut self, n: u64) -> Self {
        self.requests_per_credential = n;
        self
    }

    pub fn rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = period;
        self
    }
}

/// How [`CredentialPool::select_next`] picks among eligible credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First usable credential in insertion order. Load concentrates on
    /// early credentials until they saturate, then spills over.
    #[default]
    FirstEligible,
    /// Usable credential that was selected longest ago (never-used first),
    /// ties broken by insertion order. Spreads load evenly.
    LeastRecentlyUsed,
}

/// Credentials and quota settings for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePool {
    pub config: PoolConfig,
    pub records: Vec<CredentialRecord>,
}

impl ServicePool {
    fn position(&self, secret: &str) -> Option<usize> {
        self.records.iter().position(|r| r.secret == secret)
    }

    fn pick(&self, policy: SelectionPolicy) -> Option<usize> {
        let limit = self.config.requests_per_credential;
        let mut eligible = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_usable(limit));
        match policy {
            SelectionPolicy::FirstEligible => eligible.next().map(|(i, _)| i),
            SelectionPolicy::LeastRecentlyUsed => eligible
                .min_by_key(|(i, r)| (r.last_used_at, *i))
                .map(|(i, _)| i),
        }
    }
}

/// Aggregate view of one service pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub service: String,
    pub total_keys: usize,
    pub enabled_keys: usize,
    /// Requests served in the current window, across all keys.
    pub total_requests: u64,
    pub requests_per_credential: u64,
    pub rotation_period_secs: u64,
    pub per_key: Vec<KeySummary>,
}

/// All service pools, persisted to a single blob.
pub struct CredentialPool {
    services: Mutex<BTreeMap<String, ServicePool>>,
    store: Arc<dyn BlobStore>,
    clock: SharedClock,
    policy: SelectionPolicy,
    default_config: PoolConfig,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_clock(store, clock::system())
    }

    pub fn with_clock(store: Arc<dyn BlobStore>, clock: SharedClock) -> Self {
        Self {
            services: Mutex::new(BTreeMap::new()),
            store,
            clock,
            policy: SelectionPolicy::default(),
            default_config: PoolConfig::default(),
        }
    }

    /// Set the selection policy.
    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Config applied to services first seen through `add_credential`.
    pub fn default_config(mut self, config: PoolConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Replace in-memory state with the persisted pool.
    ///
    /// Returns the number of credentials loaded. On error the pool is left
    /// as it was; the caller decides whether to log and start fresh.
    pub async fn reload(&self) -> Result<usize> {
        let loaded = persistence::load(self.store.as_ref()).await?;
        let Some(loaded) = loaded else {
            debug!(source = %self.store.describe(), "no persisted credential pool");
            return Ok(0);
        };
        let count = loaded.values().map(|p| p.records.len()).sum();
        *self.services.lock().await = loaded;
        info!(credentials = count, source = %self.store.describe(), "reloaded credential pool");
        Ok(count)
    }

    /// Register or update a service's quota settings.
    pub async fn configure(&self, service: &str, config: PoolConfig) {
        let mut services = self.services.lock().await;
        services.entry(service.to_string()).or_default().config = config;
        self.persist(&services).await;
    }

    /// Quota settings for `service`, if it is known.
    pub async fn config(&self, service: &str) -> Option<PoolConfig> {
        self.services.lock().await.get(service).map(|p| p.config)
    }

    /// Names of all known services.
    pub async fn services(&self) -> Vec<String> {
        self.services.lock().await.keys().cloned().collect()
    }

    /// Append a new enabled credential.
    ///
    /// Returns `false` without touching the pool if the secret is already
    /// present for this service.
    pub async fn add_credential(&self, service: &str, secret: &str, label: &str) -> bool {
        let mut services = self.services.lock().await;
        if services
            .get(service)
            .is_some_and(|p| p.position(secret).is_some())
        {
            debug!(service, label, "duplicate credential rejected");
            return false;
        }
        let now = self.clock.now_millis();
        services
            .entry(service.to_string())
            .or_insert_with(|| ServicePool {
                config: self.default_config,
                records: Vec::new(),
            })
            .records
            .push(CredentialRecord::new(secret, label, now));
        info!(service, label, key = %super::mask(secret), "credential added");
        self.persist(&services).await;
        true
    }

    /// Remove a credential. Returns `false` if it was not present.
    pub async fn remove_credential(&self, service: &str, secret: &str) -> bool {
        let mut services = self.services.lock().await;
        let Some(pool) = services.get_mut(service) else {
            return false;
        };
        let Some(idx) = pool.position(secret) else {
            return false;
        };
        let removed = pool.records.remove(idx);
        info!(service, label = %removed.label, key = %removed.masked(), "credential removed");
        self.persist(&services).await;
        true
    }

    /// Enable or disable a credential. Returns `false` if it was not present.
    pub async fn set_enabled(&self, service: &str, secret: &str, enabled: bool) -> bool {
        let mut services = self.services.lock().await;
        let Some(pool) = services.get_mut(service) else {
            return false;
        };
        let Some(idx) = pool.position(secret) else {
            return false;
        };
        let record = &mut pool.records[idx];
        record.enabled = enabled;
        info!(service, label = %record.label, enabled, "credential toggled");
        self.persist(&services).await;
        true
    }

    /// Hand out the next usable credential and charge it one request.
    ///
    /// Returns [`MimirError::NoneAvailable`] when every credential is
    /// disabled or at its quota; callers fall back to their static key.
    pub async fn select_next(&self, service: &str) -> Result<String> {
        let mut services = self.services.lock().await;
        let picked = services.get_mut(service).and_then(|pool| {
            let idx = pool.pick(self.policy)?;
            let record = &mut pool.records[idx];
            record.usage_count += 1;
            record.last_used_at = Some(self.clock.now_millis());
            Some(record.secret.clone())
        });

        match picked {
            Some(secret) => {
                metrics::counter!(
                    telemetry::CREDENTIAL_SELECTIONS_TOTAL,
                    "service" => service.to_string()
                )
                .increment(1);
                self.persist(&services).await;
                Ok(secret)
            }
            None => {
                metrics::counter!(
                    telemetry::CREDENTIAL_EXHAUSTED_TOTAL,
                    "service" => service.to_string()
                )
                .increment(1);
                warn!(service, "no usable credential");
                Err(MimirError::NoneAvailable {
                    service: service.to_string(),
                })
            }
        }
    }

    /// Zero every usage counter for `service`, enabled or not.
    ///
    /// Returns the number of records reset (0 for an unknown service).
    pub async fn reset_usage(&self, service: &str) -> usize {
        let mut services = self.services.lock().await;
        let Some(pool) = services.get_mut(service) else {
            return 0;
        };
        for record in &mut pool.records {
            record.usage_count = 0;
        }
        let count = pool.records.len();
        info!(service, credentials = count, "quota window reset");
        self.persist(&services).await;
        count
    }

    /// Usage overview with masked secrets.
    pub async fn stats(&self, service: &str) -> Result<PoolStats> {
        let services = self.services.lock().await;
        let pool = services
            .get(service)
            .ok_or_else(|| MimirError::NotFound(format!("service '{service}'")))?;
        let limit = pool.config.requests_per_credential;
        Ok(PoolStats {
            service: service.to_string(),
            total_keys: pool.records.len(),
            enabled_keys: pool.records.iter().filter(|r| r.enabled).count(),
            total_requests: pool.records.iter().map(|r| r.usage_count).sum(),
            requests_per_credential: limit,
            rotation_period_secs: pool.config.rotation_period.as_secs(),
            per_key: pool.records.iter().map(|r| r.summary(limit)).collect(),
        })
    }

    /// Find the full secret for a label, for admin tooling that addresses
    /// credentials by name.
    pub async fn secret_for_label(&self, service: &str, label: &str) -> Option<String> {
        let services = self.services.lock().await;
        services
            .get(service)?
            .records
            .iter()
            .find(|r| r.label == label)
            .map(|r| r.secret.clone())
    }

    async fn persist(&self, services: &BTreeMap<String, ServicePool>) {
        let now = self.clock.now_millis();
        if let Err(e) = persistence::save(self.store.as_ref(), services, now).await {
            metrics::counter!(telemetry::STORAGE_ERRORS_TOTAL, "store" => "credentials")
                .increment(1);
            warn!(
                store = %self.store.describe(),
                error = %e,
                "failed to persist credential pool; continuing in memory"
            );
        }
    }
}
