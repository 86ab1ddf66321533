//! Sliding-window limiter with a block period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace};

use super::identity::{Dimension, IdentityKey};
use crate::clock::{duration_millis, Clock};
use crate::error::{ConfigError, StoreError};
use crate::store::CounterStore;

/// Limits for one identity dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    capacity: u64,
    window: Duration,
    block: Duration,
    window_ms: i64,
    block_ms: i64,
}

impl LimitConfig {
    /// Build a configuration.
    ///
    /// Capacity must be at least one. Both durations must be at least a
    /// millisecond and their millisecond count must fit in an `i64`.
    pub fn new(capacity: u64, window: Duration, block: Duration) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::OutOfRange {
                name: "capacity".to_string(),
            });
        }
        let window_ms = checked_millis("window", window)?;
        let block_ms = checked_millis("block", block)?;
        Ok(Self {
            capacity,
            window,
            block,
            window_ms,
            block_ms,
        })
    }

    /// Maximum number of admitted events per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn block(&self) -> Duration {
        self.block
    }

    pub fn window_millis(&self) -> i64 {
        self.window_ms
    }

    pub fn block_millis(&self) -> i64 {
        self.block_ms
    }
}

fn checked_millis(name: &str, duration: Duration) -> Result<i64, ConfigError> {
    duration_millis(duration).ok_or_else(|| ConfigError::OutOfRange {
        name: name.to_string(),
    })
}

/// Why a request was admitted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Under capacity; the event was recorded.
    Admitted,
    /// The window was full; a block period has just started.
    OverCapacity,
    /// A block period is in effect.
    Blocked,
    /// The store failed, so no safe decision could be made.
    StoreUnavailable,
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    /// Events in the window as seen by this check (including the admitted
    /// one), or the limiter's last reported count if the window was not read.
    pub count: u64,
}

impl Decision {
    pub fn admitted(&self) -> bool {
        self.outcome == Outcome::Admitted
    }
}

/// Sliding-window limiter for a single identity dimension.
///
/// All per-identity state lives in the counter store. Besides its
/// configuration the limiter only remembers the last count it reported.
pub struct SlidingWindowLimiter {
    dimension: Dimension,
    config: LimitConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    last_count: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new(
        dimension: Dimension,
        config: LimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dimension,
            config,
            store,
            clock,
            last_count: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// The count reported by the most recent window evaluation.
    pub fn last_count(&self) -> u64 {
        self.last_count.load(Ordering::Relaxed)
    }

    /// Decide whether a request for `key` may proceed.
    ///
    /// Any store failure rejects the request.
    pub async fn allow_request(&self, key: &IdentityKey) -> Decision {
        let now = self.clock.now_millis();
        let block_key = key.block_key();

        match self.is_blocked(&block_key, now).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(dimension = %self.dimension, key = %key, "Identity is blocked");
                return self.reject(Outcome::Blocked);
            }
            Err(e) => {
                self.report(&e);
                return self.reject(Outcome::StoreUnavailable);
            }
        }

        let window_start = now.saturating_sub(self.config.window_millis());

        if let Err(e) = self.store.prune_before(key.as_str(), window_start).await {
            self.report(&e);
            return self.reject(Outcome::StoreUnavailable);
        }

        let count = match self.store.count_from(key.as_str(), window_start).await {
            Ok(count) => count,
            Err(e) => {
                // The window can't be read, so treat the identity as over capacity.
                self.report(&e);
                self.start_block(&block_key, now).await;
                return self.reject(Outcome::StoreUnavailable);
            }
        };

        if count >= self.config.capacity {
            debug!(
                dimension = %self.dimension,
                key = %key,
                count = count,
                capacity = self.config.capacity,
                block_ms = self.config.block_millis(),
                "Capacity reached, starting block period"
            );
            self.start_block(&block_key, now).await;
            self.last_count.store(count, Ordering::Relaxed);
            return Decision {
                outcome: Outcome::OverCapacity,
                count,
            };
        }

        if let Err(e) = self.store.add(key.as_str(), now).await {
            self.report(&e);
            return self.reject(Outcome::StoreUnavailable);
        }

        let count = count + 1;
        self.last_count.store(count, Ordering::Relaxed);

        trace!(dimension = %self.dimension, key = %key, count = count, "Request admitted");

        Decision {
            outcome: Outcome::Admitted,
            count,
        }
    }

    /// Whether a block marker younger than the block duration exists.
    ///
    /// Expired markers are pruned first, so a block ends on its own once
    /// `block` has passed since the overflow that started it.
    async fn is_blocked(&self, block_key: &str, now: i64) -> Result<bool, StoreError> {
        let block_start = now.saturating_sub(self.config.block_millis());
        self.store.prune_before(block_key, block_start).await?;
        let markers = self.store.count_from(block_key, block_start).await?;
        Ok(markers > 0)
    }

    /// Record a block marker. A failed write is logged and otherwise ignored,
    /// since the caller rejects either way.
    async fn start_block(&self, block_key: &str, now: i64) {
        if let Err(e) = self.store.add(block_key, now).await {
            self.report(&e);
        }
    }

    fn reject(&self, outcome: Outcome) -> Decision {
        Decision {
            outcome,
            count: self.last_count(),
        }
    }

    fn report(&self, err: &StoreError) {
        error!(
            dimension = %self.dimension,
            key = %err.key,
            operation = %err.operation,
            error = %err.source,
            "Counter store failure, rejecting request"
        );
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("dimension", &self.dimension)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
