//! Key-value store backends.
//!
//! Two traits split the store surface the same way the service does:
//!
//! - [`CacheBackend`]: the generic byte-level cache abstraction behind
//!   `get` / `set` / `del` / `reset`.
//! - [`StoreCommands`]: store-native primitives the generic interface cannot
//!   express (pattern search, pub/sub, counters, sorted sets, hashes, expiry).

use crate::error::Result;
use crate::pubsub::MessageListener;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend};

/// Trait for the generic cache abstraction.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow
/// concurrent access. A backend value is a shared handle (pool, `Arc`ed map),
/// so clones talk to the same store.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Key absent or expired
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value in cache with optional TTL.
    ///
    /// `None` writes without expiry.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove value from cache. Absent keys are not an error.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key matching a glob pattern; returns how many were removed.
    ///
    /// Implementations must iterate incrementally (e.g. `SCAN`), not with a
    /// single blocking `KEYS`.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Clear the whole logical database (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn clear_all(&self) -> Result<()>;

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Release the underlying connections. Further calls fail.
    async fn close(&self) {}
}

/// Store-native commands, bypassing the generic abstraction.
///
/// Each command is individually atomic at the store. Nothing here composes
/// commands into transactions.
#[allow(async_fn_in_trait)]
pub trait StoreCommands: CacheBackend {
    /// All keys matching a glob pattern.
    ///
    /// On Redis this is `KEYS`, which blocks the server while it walks the
    /// keyspace. Restrict to low-cardinality namespaces or admin use.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Broadcast a message; returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64>;

    /// Atomic increment; an absent key counts from 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Insert or update `member` with `score`; returns 1 if newly added, 0 on update.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64>;

    /// Field lookup in a hash.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set a hash field; returns 1 if the field is new, 0 on overwrite.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<u64>;

    /// Number of the given keys that exist (0 or 1 here).
    async fn exists(&self, key: &str) -> Result<u64>;

    /// Set with expiry in a single command; returns the store's confirmation.
    ///
    /// The TTL keeps millisecond precision. Anything under 1 ms is rejected
    /// with `Error::CommandFailed`.
    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<String>;

    /// Remaining time to live.
    ///
    /// `Ok(None)` when the key has no expiry.
    ///
    /// # Errors
    /// `Error::NotFound` when the key does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Open a dedicated pub/sub listener connection.
    ///
    /// Called once per [`SubscriptionDispatcher`](crate::pubsub::SubscriptionDispatcher).
    async fn open_listener(&self) -> Result<MessageListener>;
}
