//! API credential rotation.
//!
//! - [`pool::CredentialPool`]: per-service credential lists, quota-aware
//!   selection, synchronous persistence on every mutation.
//! - [`scheduler::QuotaResetScheduler`]: resets usage counters every
//!   rotation period.
//! - [`persistence`]: the on-disk pool format.
//!
//! Full secrets leave the pool only through [`CredentialPool::select_next`]
//! (and label lookup for admin tooling). Every read-only view uses
//! [`mask`].

pub mod persistence;
pub mod pool;
mod record;
pub mod scheduler;

pub use pool::{CredentialPool, PoolConfig, PoolStats, SelectionPolicy, ServicePool};
pub use record::{CredentialRecord, KeySummary, mask};
pub use scheduler::QuotaResetScheduler;
