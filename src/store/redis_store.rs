//! Redis-backed counter store.
//!
//! Every key is a Redis sorted set whose scores are event timestamps in
//! milliseconds:
//! - `add` is `ZADD key ts "<ts>-<uuid>"` plus `PEXPIRE key ttl`, sent as one
//!   MULTI/EXEC pipeline
//! - `count_from` is `ZCOUNT key lower +inf`
//! - `prune_before` is `ZREMRANGEBYSCORE key -inf (upper`
//!
//! Members carry a random suffix so events landing on the same millisecond
//! are all kept. The TTL lets sets belonging to clients that went quiet
//! expire on their own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::info;
use uuid::Uuid;

use super::CounterStore;
use crate::clock::duration_millis;
use crate::error::{StoreError, StoreOperation};

/// Longest key TTL sent to Redis (about 100 years).
const MAX_TTL_MILLIS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every Redis key (default: "turnstile:")
    pub key_prefix: String,
    /// Idle lifetime of a key after its last insert (default: 1 hour)
    pub key_ttl: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "turnstile:".to_string(),
            key_ttl: Duration::from_secs(3600),
        }
    }
}

/// Counter store shared through a Redis server.
///
/// Cloning is cheap and every clone multiplexes over the same connection.
/// The connection is closed once the last clone is dropped.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with the default configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(
            key_prefix = %config.key_prefix,
            key_ttl_ms = ttl_millis(config.key_ttl),
            "Connected to Redis counter store"
        );

        Ok(Self { connection, config })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn ttl_millis(&self) -> i64 {
        ttl_millis(self.config.key_ttl)
    }
}

/// PEXPIRE argument for `ttl`.
///
/// Redis rejects zero and any expiry that overflows once added to its own
/// clock, so the value is clamped to `1..=MAX_TTL_MILLIS`.
fn ttl_millis(ttl: Duration) -> i64 {
    duration_millis(ttl).map_or(1, |ms| ms.min(MAX_TTL_MILLIS))
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn add(&self, key: &str, timestamp: i64) -> Result<(), StoreError> {
        let redis_key = self.key(key);
        let member = format!("{}-{}", timestamp, Uuid::new_v4());
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .zadd(&redis_key, member, timestamp)
            .ignore()
            .pexpire(&redis_key, self.ttl_millis())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(StoreOperation::Add, key, e))?;

        Ok(())
    }

    async fn count_from(&self, key: &str, lower_inclusive: i64) -> Result<u64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();

        let count: u64 = conn
            .zcount(&redis_key, lower_inclusive, "+inf")
            .await
            .map_err(|e| StoreError::new(StoreOperation::CountFrom, key, e))?;

        Ok(count)
    }

    async fn prune_before(&self, key: &str, upper_exclusive: i64) -> Result<(), StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();

        let _: () = conn
            .zrembyscore(&redis_key, "-inf", format!("({upper_exclusive}"))
            .await
            .map_err(|e| StoreError::new(StoreOperation::PruneBefore, key, e))?;

        Ok(())
    }
}
