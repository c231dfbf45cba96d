//! Mimir - response cache and API credential rotation for pay-per-call LLM APIs
//!
//! Mimir sits between application logic and a text-generation API. It
//! avoids paying twice for the same completion by caching results under a
//! normalized-query key, and spreads calls across several API credentials
//! so no single key exceeds its rate limit or budget.
//!
//! # Example
//!
//! ```rust,no_run
//! use mimir::{Mimir, PoolConfig, QueryOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let guard = Mimir::builder()
//!         .service("groq", PoolConfig::new().requests_per_credential(500))
//!         .primary_credential("groq", "gsk-your-key")
//!         .build()?;
//!     guard.init().await;
//!
//!     let opts = QueryOptions::new().model("llama-3.1-8b-instant");
//!     let query = "What is the capital of France?";
//!
//!     let answer = match guard.lookup_or_miss(query, &opts)? {
//!         Some(cached) => cached,
//!         None => {
//!             let _key = guard.acquire_credential("groq").await?;
//!             // ... perform the paid call with `_key` ...
//!             let fresh = json!({ "text": "Paris" });
//!             guard.store(query, &opts, fresh.clone())?;
//!             fresh
//!         }
//!     };
//!     println!("{answer}");
//!
//!     guard.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod storage;
pub mod task;
pub mod telemetry;

// Re-export main types at crate root
pub use error::{MimirError, Result};
pub use gateway::{CallGuard, InitReport, Mimir, MimirBuilder};

pub use cache::{
    CacheConfig, CacheEntry, CacheStats, KeyNormalizer, QueryClass, QueryClassifier, QueryOptions,
    ResponseCache,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialPool, PoolConfig, PoolStats, SelectionPolicy};
pub use storage::{BlobStore, FileBlobStore, MemoryBlobStore};

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
