//! The caller-facing control layer.
//!
//! [`CallGuard`] ties the response cache and the credential pool together
//! behind the three calls a completion client needs:
//!
//! 1. [`lookup_or_miss`](CallGuard::lookup_or_miss) before a paid call,
//! 2. [`acquire_credential`](CallGuard::acquire_credential) on a miss,
//! 3. [`store`](CallGuard::store) with the fresh completion.
//!
//! It also owns the lifecycle: [`init`](CallGuard::init) reloads both
//! stores and starts the snapshot and quota-reset timers;
//! [`shutdown`](CallGuard::shutdown) stops them and writes a final,
//! best-effort snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::{
    CacheConfig, CachePersistence, CacheStats, KeyNormalizer, QueryClass, QueryClassifier,
    QueryOptions, ResponseCache,
};
use crate::clock::{self, SharedClock};
use crate::config::{Config, Secrets};
use crate::credentials::{
    CredentialPool, PoolConfig, PoolStats, QuotaResetScheduler, SelectionPolicy,
};
use crate::storage::{BlobStore, FileBlobStore, MemoryBlobStore};
use crate::task::PeriodicTask;
use crate::telemetry;
use crate::{MimirError, Result};

/// Main entry point for creating a [`CallGuard`].
pub struct Mimir;

impl Mimir {
    /// Create a new builder.
    pub fn builder() -> MimirBuilder {
        MimirBuilder::new()
    }
}

/// Builder for [`CallGuard`].
pub struct MimirBuilder {
    cache_config: CacheConfig,
    key_defaults: QueryOptions,
    classifier: QueryClassifier,
    cache_store: Option<Arc<dyn BlobStore>>,
    credential_store: Option<Arc<dyn BlobStore>>,
    services: BTreeMap<String, PoolConfig>,
    primary: BTreeMap<String, String>,
    policy: SelectionPolicy,
    clock: SharedClock,
}

impl MimirBuilder {
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            key_defaults: QueryOptions::default(),
            classifier: QueryClassifier::default(),
            cache_store: None,
            credential_store: None,
            services: BTreeMap::new(),
            primary: BTreeMap::new(),
            policy: SelectionPolicy::default(),
            clock: clock::system(),
        }
    }

    /// Seed the builder from loaded configuration and secrets.
    ///
    /// File-backed stores are used at the configured (or default) paths.
    /// A primary credential is registered for every configured service
    /// whose key is found in `secrets` or the environment.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Self {
        let mut builder = Self::new()
            .cache_config(config.cache.cache_config())
            .key_defaults(config.cache.key_defaults())
            .cache_path(config.cache.resolved_path())
            .credentials_path(config.credentials.resolved_path())
            .selection_policy(config.credentials.policy);
        for (name, section) in &config.services {
            builder = builder.service(name, section.pool_config());
            if let Some(key) = secrets.api_key(name) {
                builder = builder.primary_credential(name, key);
            }
        }
        builder
    }

    /// Set the response cache configuration.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Option values assumed when callers omit them (see [`KeyNormalizer`]).
    pub fn key_defaults(mut self, defaults: QueryOptions) -> Self {
        self.key_defaults = defaults;
        self
    }

    /// Replace the factual/conversational classifier.
    pub fn classifier(mut self, classifier: QueryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Blob store for cache snapshots.
    pub fn cache_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Snapshot the cache to a file.
    pub fn cache_path(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.cache_store(Arc::new(FileBlobStore::new(path)))
    }

    /// Blob store for the credential pool.
    pub fn credential_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Persist the credential pool to a file.
    pub fn credentials_path(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.credential_store(Arc::new(FileBlobStore::private(path)))
    }

    /// Keep both stores in memory only (nothing survives a restart).
    pub fn in_memory(self) -> Self {
        self.cache_store(Arc::new(MemoryBlobStore::new()))
            .credential_store(Arc::new(MemoryBlobStore::new()))
    }

    /// Register a service and its quota settings.
    pub fn service(mut self, name: impl Into<String>, config: PoolConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }

    /// Statically configured key for `service`.
    ///
    /// Added to the pool as `"primary"` on [`CallGuard::init`] and used as
    /// the fallback by [`CallGuard::acquire_credential_or_default`].
    pub fn primary_credential(mut self, service: impl Into<String>, secret: impl Into<String>) -> Self {
        self.primary.insert(service.into(), secret.into());
        self
    }

    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Inject a clock (tests, simulations).
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Validate settings and construct the guard. Call
    /// [`CallGuard::init`] before use.
    pub fn build(self) -> Result<CallGuard> {
        if self.cache_config.max_entries == 0 {
            return Err(MimirError::Configuration(
                "cache max_entries must be at least 1".to_string(),
            ));
        }
        if self.cache_config.snapshot_interval.is_zero() {
            return Err(MimirError::Configuration(
                "cache snapshot interval must be non-zero".to_string(),
            ));
        }
        for (name, config) in &self.services {
            if config.requests_per_credential == 0 {
                return Err(MimirError::Configuration(format!(
                    "service '{name}': requests_per_credential must be at least 1"
                )));
            }
            if config.rotation_period.is_zero() {
                return Err(MimirError::Configuration(format!(
                    "service '{name}': rotation period must be non-zero"
                )));
            }
        }

        let cache_store = self.cache_store.unwrap_or_else(|| {
            Arc::new(FileBlobStore::new(
                crate::config::default_data_dir().join("cache.json"),
            ))
        });
        let credential_store = self.credential_store.unwrap_or_else(|| {
            Arc::new(FileBlobStore::private(
                crate::config::default_data_dir().join("credentials.json"),
            ))
        });

        let cache = Arc::new(ResponseCache::with_clock(
            self.cache_config,
            Arc::clone(&self.clock),
        ));
        let pool = Arc::new(
            CredentialPool::with_clock(credential_store, self.clock).policy(self.policy),
        );

        Ok(CallGuard {
            persistence: CachePersistence::new(Arc::clone(&cache), cache_store),
            cache,
            normalizer: KeyNormalizer::with_defaults(self.key_defaults),
            classifier: self.classifier,
            scheduler: Mutex::new(QuotaResetScheduler::new(Arc::clone(&pool))),
            pool,
            services: self.services,
            primary: self.primary,
            snapshot_task: Mutex::new(None),
        })
    }
}

impl Default for MimirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`CallGuard::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub cache_entries: usize,
    pub cache_expired: usize,
    pub credentials: usize,
    /// Whether either durable blob was unreadable and skipped.
    pub degraded: bool,
}

/// Cache + credential rotation in front of a pay-per-call API.
pub struct CallGuard {
    cache: Arc<ResponseCache>,
    persistence: CachePersistence,
    normalizer: KeyNormalizer,
    classifier: QueryClassifier,
    pool: Arc<CredentialPool>,
    scheduler: Mutex<QuotaResetScheduler>,
    services: BTreeMap<String, PoolConfig>,
    primary: BTreeMap<String, String>,
    snapshot_task: Mutex<Option<PeriodicTask>>,
}

impl CallGuard {
    /// Reload durable state, register bootstrap credentials and start the
    /// background timers.
    ///
    /// Unreadable blobs are logged and skipped; init itself does not fail
    /// because of storage.
    pub async fn init(&self) -> InitReport {
        let mut report = InitReport::default();

        match self.persistence.reload().await {
            Ok(reload) => {
                report.cache_entries = reload.restored;
                report.cache_expired = reload.expired;
            }
            Err(e) => {
                report.degraded = true;
                storage_error("cache");
                warn!(error = %e, "ignoring unreadable cache snapshot; starting empty");
            }
        }

        match self.pool.reload().await {
            Ok(count) => report.credentials = count,
            Err(e) => {
                report.degraded = true;
                storage_error("credentials");
                warn!(error = %e, "ignoring unreadable credential pool; starting fresh");
            }
        }

        for (name, config) in &self.services {
            self.pool.configure(name, *config).await;
        }
        for (service, secret) in &self.primary {
            if self.pool.add_credential(service, secret, "primary").await {
                report.credentials += 1;
            }
        }

        self.scheduler.lock().await.start_all().await;
        self.start_snapshots().await;

        info!(
            cache_entries = report.cache_entries,
            credentials = report.credentials,
            degraded = report.degraded,
            "mimir initialised"
        );
        report
    }

    async fn start_snapshots(&self) {
        let persistence = self.persistence.clone();
        let interval = self.cache.config().snapshot_interval;
        let task = PeriodicTask::spawn("cache-snapshot", interval, move || {
            let persistence = persistence.clone();
            async move {
                if let Err(e) = persistence.snapshot().await {
                    storage_error("cache");
                    warn!(error = %e, "cache snapshot failed; will retry next interval");
                }
            }
        });
        *self.snapshot_task.lock().await = Some(task);
    }

    /// Stop timers and write a final cache snapshot (best effort).
    pub async fn shutdown(&self) {
        if let Some(task) = self.snapshot_task.lock().await.take() {
            task.stop().await;
        }
        self.scheduler.lock().await.stop().await;
        if let Err(e) = self.persistence.snapshot().await {
            storage_error("cache");
            warn!(error = %e, "final cache snapshot failed");
        }
        info!("mimir shut down");
    }

    // ------------------------------------------------------------------
    // Completion-client surface
    // ------------------------------------------------------------------

    /// Cache key for a query under this guard's key defaults.
    pub fn cache_key(&self, query: &str, options: &QueryOptions) -> Result<String> {
        self.normalizer.normalize(query, options)
    }

    /// Cached payload for `query`, or `None` on a miss.
    pub fn lookup_or_miss(&self, query: &str, options: &QueryOptions) -> Result<Option<Value>> {
        let key = self.normalizer.normalize(query, options)?;
        Ok(self.cache.get(&key))
    }

    /// Cache a fresh completion. Returns the class that decided its TTL.
    pub fn store(&self, query: &str, options: &QueryOptions, payload: Value) -> Result<QueryClass> {
        let key = self.normalizer.normalize(query, options)?;
        let class = self.classifier.classify(query);
        self.cache.put(key, payload, class);
        Ok(class)
    }

    /// Next usable credential for `service`, charged one request.
    pub async fn acquire_credential(&self, service: &str) -> Result<String> {
        self.pool.select_next(service).await
    }

    /// Like [`acquire_credential`](Self::acquire_credential), but falls
    /// back to the statically configured primary key when the pool is
    /// exhausted. The fallback is not quota-tracked.
    pub async fn acquire_credential_or_default(&self, service: &str) -> Option<String> {
        match self.pool.select_next(service).await {
            Ok(secret) => Some(secret),
            Err(_) => {
                let fallback = self.primary.get(service).cloned();
                if fallback.is_some() {
                    warn!(service, "pool exhausted; using primary credential untracked");
                }
                fallback
            }
        }
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("response cache cleared");
    }

    /// Snapshot the cache now, outside the timer.
    pub async fn snapshot_now(&self) -> Result<usize> {
        self.persistence.snapshot().await
    }

    pub async fn pool_stats(&self, service: &str) -> Result<PoolStats> {
        self.pool.stats(service).await
    }

    /// Add a credential. A service seen for the first time gets its reset
    /// timer here when the guard is already running.
    pub async fn add_credential(&self, service: &str, secret: &str, label: &str) -> bool {
        let added = self.pool.add_credential(service, secret, label).await;
        if added {
            self.scheduler.lock().await.ensure(service).await;
        }
        added
    }

    /// Change a service's quota settings at runtime, restarting its reset
    /// timer with the new rotation period.
    pub async fn configure_service(&self, service: &str, config: PoolConfig) -> Result<()> {
        if config.rotation_period.is_zero() {
            return Err(MimirError::Configuration(format!(
                "service '{service}': rotation period must be non-zero"
            )));
        }
        self.pool.configure(service, config).await;
        self.scheduler.lock().await.reschedule(service).await;
        Ok(())
    }

    pub async fn remove_credential(&self, service: &str, secret: &str) -> bool {
        self.pool.remove_credential(service, secret).await
    }

    pub async fn set_credential_enabled(&self, service: &str, secret: &str, enabled: bool) -> bool {
        self.pool.set_enabled(service, secret, enabled).await
    }

    /// Reset a service's quota window now.
    pub async fn reset_quota(&self, service: &str) -> usize {
        self.pool.reset_usage(service).await
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }
}

fn storage_error(store: &'static str) {
    metrics::counter!(telemetry::STORAGE_ERRORS_TOTAL, "store" => store).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_rejects_zero_capacity() {
        let result = Mimir::builder()
            .in_memory()
            .cache_config(CacheConfig::new().max_entries(0))
            .build();
        assert!(matches!(result, Err(MimirError::Configuration(_))));
    }

    #[test]
    fn build_rejects_zero_quota() {
        let result = Mimir::builder()
            .in_memory()
            .service("groq", PoolConfig::new().requests_per_credential(0))
            .build();
        assert!(matches!(result, Err(MimirError::Configuration(_))));
    }

    #[tokio::test]
    async fn store_then_lookup() {
        let guard = Mimir::builder().in_memory().build().unwrap();
        guard.init().await;

        let opts = QueryOptions::new().model("m");
        assert!(guard.lookup_or_miss("Capital of France", &opts).unwrap().is_none());
        let class = guard
            .store("Capital of France", &opts, json!({"text": "Paris"}))
            .unwrap();
        assert_eq!(class, QueryClass::Factual);
        assert_eq!(
            guard.lookup_or_miss("  capital of FRANCE ", &opts).unwrap(),
            Some(json!({"text": "Paris"}))
        );
        guard.shutdown().await;
    }

    #[tokio::test]
    async fn primary_credential_bootstraps_pool() {
        let guard = Mimir::builder()
            .in_memory()
            .service("groq", PoolConfig::new().requests_per_credential(1))
            .primary_credential("groq", "gsk_primary_key_abc")
            .build()
            .unwrap();
        let report = guard.init().await;
        assert_eq!(report.credentials, 1);
        assert!(!report.degraded);

        assert_eq!(
            guard.acquire_credential("groq").await.unwrap(),
            "gsk_primary_key_abc"
        );
        assert!(guard.acquire_credential("groq").await.is_err());
        assert_eq!(
            guard.acquire_credential_or_default("groq").await.as_deref(),
            Some("gsk_primary_key_abc")
        );
        assert!(guard.acquire_credential_or_default("other").await.is_none());
        guard.shutdown().await;
    }
}
