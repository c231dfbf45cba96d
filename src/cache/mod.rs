//! Response caching subsystem.
//!
//! - [`key`]: canonicalises a query plus call options into a SHA-256 key.
//! - [`classify`]: decides whether a query is `factual` (long TTL) or
//!   `conversational` (short TTL).
//! - [`store::ResponseCache`]: bounded in-memory store with lazy expiry.
//! - [`eviction`]: the scoring function used when the store overflows.
//! - [`persistence`]: periodic snapshot and expiry-filtering reload.

pub mod classify;
pub mod entry;
pub mod eviction;
pub mod key;
pub mod persistence;
pub mod store;

pub use classify::{QueryClass, QueryClassifier};
pub use entry::CacheEntry;
pub use key::{KeyNormalizer, QueryOptions, normalize};
pub use persistence::{CachePersistence, CacheSnapshot, ReloadReport};
pub use store::{CacheConfig, CacheStats, ResponseCache};
