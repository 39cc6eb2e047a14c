//! # Keyed TTL Store client
//!
//! Narrow async contract over a Redis-compatible keyed store: unconditional
//! `set` with absolute TTL, `get`, millisecond `pttl` introspection,
//! `pexpire`, `delete`, and a pipelined rotate that writes a new key and
//! shortens an old one's TTL in a single round-trip.

use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Remaining TTL of a key, matching Redis `PTTL` semantics: `-2` if the key
/// is absent, `-1` if it exists without an expiry, otherwise milliseconds
/// remaining.
pub type PttlMs = i64;

pub const PTTL_ABSENT: PttlMs = -2;
pub const PTTL_NO_EXPIRY: PttlMs = -1;

/// Keyed TTL store contract consumed by the dispatcher and watchdog.
///
/// Implementations must treat every primitive as independently fallible:
/// callers retry on the next tick rather than aborting a whole pass.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Unconditional write with an absolute TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Returns the current value under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remaining TTL in milliseconds. See [`PTTL_ABSENT`] / [`PTTL_NO_EXPIRY`].
    async fn pttl(&self, key: &str) -> Result<PttlMs, StoreError>;

    /// Sets the remaining TTL of an existing key, in milliseconds.
    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically writes `new_key` with `ttl_seconds` and, only if
    /// `old_key_still_exists` is true, shortens `old_key`'s TTL to
    /// `old_key_grace_ms`. Both commands are issued as one pipelined
    /// round-trip so no consumer can observe `new_key` without `old_key`
    /// still being readable for the grace window.
    async fn rotate(
        &self,
        new_key: &str,
        value: &str,
        ttl_seconds: u64,
        old_key: &str,
        old_key_still_exists: bool,
        old_key_grace_ms: i64,
    ) -> Result<(), StoreError>;
}

/// [`KeyedStore`] backed by a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`) with the
    /// recommended 5s connect/read timeout.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        let config = redis::aio::ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(5));
        let conn = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn pttl(&self, key: &str) -> Result<PttlMs, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.pttl(key).await?)
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.pexpire::<_, ()>(key, ttl_ms).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn rotate(
        &self,
        new_key: &str,
        value: &str,
        ttl_seconds: u64,
        old_key: &str,
        old_key_still_exists: bool,
        old_key_grace_ms: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().set_ex(new_key, value, ttl_seconds);
        if old_key_still_exists {
            pipe.pexpire(old_key, old_key_grace_ms);
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
