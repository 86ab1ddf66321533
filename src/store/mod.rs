//! Ordered counter stores.
//!
//! A store keeps, per key, a multiset of millisecond timestamps. The limiter
//! only ever needs three things from it: record an event, count events from
//! a point in time onward, and forget events before a point in time.

mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// Time-ordered event counter shared by every limiter.
///
/// Implementations must serialize concurrent inserts into the same key
/// without losing any of them.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Record one event under `key`, scored by `timestamp` (ms since epoch).
    /// Duplicate timestamps are kept as separate events.
    async fn add(&self, key: &str, timestamp: i64) -> Result<(), StoreError>;

    /// Number of events under `key` scored at or after `lower_inclusive`.
    async fn count_from(&self, key: &str, lower_inclusive: i64) -> Result<u64, StoreError>;

    /// Drop every event under `key` scored strictly before `upper_exclusive`.
    async fn prune_before(&self, key: &str, upper_exclusive: i64) -> Result<(), StoreError>;
}
