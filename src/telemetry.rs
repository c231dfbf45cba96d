//! Telemetry metric name constants.
//!
//! Centralised metric names for mimir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `class`: query class of a cache entry: "factual" or "conversational"
//! - `service`: credential pool name (e.g. "groq")
//! - `store`: durable blob owner: "cache" or "credentials"

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total response cache misses (absent or expired).
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Total entries removed by scored eviction.
///
/// Labels: `class`.
pub const CACHE_EVICTIONS_TOTAL: &str = "mimir_cache_evictions_total";

/// Total entries dropped because they outlived their TTL.
pub const CACHE_EXPIRED_TOTAL: &str = "mimir_cache_expired_total";

/// Total successful credential selections.
///
/// Labels: `service`.
pub const CREDENTIAL_SELECTIONS_TOTAL: &str = "mimir_credential_selections_total";

/// Total selection attempts that found every credential disabled or over quota.
///
/// Labels: `service`.
pub const CREDENTIAL_EXHAUSTED_TOTAL: &str = "mimir_credential_exhausted_total";

/// Total failed durable reads or writes.
///
/// Labels: `store`.
pub const STORAGE_ERRORS_TOTAL: &str = "mimir_storage_errors_total";
