//! Redis store backend.

use super::{CacheBackend, StoreCommands};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::pubsub::{Message, MessageListener, SubscriptionSink};
use deadpool_redis::redis::aio::PubSubSink;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::time::Duration;

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Redis backend with connection pooling and async operations.
///
/// Commands go through a deadpool-managed pool; pub/sub uses one dedicated
/// connection opened on demand by the subscription dispatcher.
///
/// # Example
///
/// ```no_run
/// # use kvbridge::backend::{RedisBackend, CacheBackend, StoreCommands};
/// # use kvbridge::config::StoreConfig;
/// # use kvbridge::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(&StoreConfig::default()).await?;
///
/// backend.set("key", b"value".to_vec(), None).await?;
/// let hits = backend.incr("hits").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    client: redis::Client,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or the pool cannot be built.
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let backend = Self::build(
            &config.connection_string()?,
            config.pool_size,
            config.connection_timeout,
        )?;

        info!(
            "✓ Redis backend initialized: {}:{}/{} (pool size: {})",
            config.host, config.port, config.database, config.pool_size
        );

        Ok(backend)
    }

    /// Create from connection string directly.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or the pool cannot be built.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let defaults = StoreConfig::default();
        let backend = Self::build(conn_str, defaults.pool_size, defaults.connection_timeout)?;

        info!(
            "✓ Redis backend initialized from connection string (pool size: {})",
            defaults.pool_size
        );

        Ok(backend)
    }

    fn build(conn_str: &str, pool_size: u32, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(conn_str)
            .map_err(|e| Error::ConfigError(format!("Invalid Redis URL: {}", e)))?;

        let mut cfg = PoolConfig::from_url(conn_str);
        let mut pool_cfg = deadpool_redis::PoolConfig::new(pool_size as usize);
        pool_cfg.timeouts.wait = Some(timeout);
        pool_cfg.timeouts.create = Some(timeout);
        pool_cfg.timeouts.recycle = Some(timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create Redis pool: {}", e)))?;

        Ok(RedisBackend { pool, client })
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    /// Check out a pooled connection.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` or `Error::Timeout` from the pool.
    pub async fn connection(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn scan_keys(&self, conn: &mut Connection, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut **conn)
                .await?;

            found.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = conn.get(key).await?;

        if value.is_some() {
            debug!("✓ Redis GET {} -> HIT", key);
        } else {
            debug!("✓ Redis GET {} -> MISS", key);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;

        match ttl {
            Some(duration) => {
                let millis = (duration.as_millis() as u64).max(1);
                conn.pset_ex::<_, _, ()>(key, value, millis).await?;
                debug!("✓ Redis SET {} (TTL: {}ms)", key, millis);
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
                debug!("✓ Redis SET {}", key);
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.del::<_, ()>(key).await?;

        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let keys = self.scan_keys(&mut conn, pattern).await?;

        let mut removed = 0u64;
        for chunk in keys.chunks(SCAN_BATCH) {
            let n: u64 = conn.del(chunk).await?;
            removed += n;
        }

        debug!("✓ Redis DELETE MATCHING {} ({} keys)", pattern, removed);
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await?;

        warn!("⚠ Redis FLUSHDB executed - all keys cleared!");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;

        Ok(pong == "PONG")
    }

    async fn close(&self) {
        self.pool.close();
        info!("Redis pool closed");
    }
}

impl StoreCommands for RedisBackend {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        debug!("✓ Redis KEYS {} -> {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let receivers: u64 = conn.publish(channel, message).await?;
        debug!("✓ Redis PUBLISH {} -> {} receivers", channel, receivers);
        Ok(receivers)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        let value: i64 = conn.incr(key, 1).await?;
        debug!("✓ Redis INCR {} -> {}", key, value);
        Ok(value)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let added: u64 = conn.zadd(key, member, score).await?;
        debug!("✓ Redis ZADD {} {} {} -> {}", key, score, member, added);
        Ok(added)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let added: u64 = conn.hset(key, field, value).await?;
        Ok(added)
    }

    async fn exists(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let count: u64 = conn.exists(key).await?;
        Ok(count)
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<String> {
        let mut conn = self.connection().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let reply: String = conn.pset_ex(key, value, millis).await?;
        debug!("✓ Redis PSETEX {} (TTL: {}ms)", key, millis);
        Ok(reply)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection().await?;
        let millis: i64 = conn.pttl(key).await?;
        match millis {
            -2 => Err(Error::NotFound(key.to_string())),
            ms if ms < 0 => Ok(None),
            ms => Ok(Some(Duration::from_millis(ms as u64))),
        }
    }

    async fn open_listener(&self) -> Result<MessageListener> {
        let pubsub = self.client.get_async_pubsub().await?;
        let (sink, stream) = pubsub.split();

        let messages = stream
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(Message {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    }),
                    Err(e) => {
                        warn!(
                            "Dropping undecodable message on {}: {}",
                            msg.get_channel_name(),
                            e
                        );
                        None
                    }
                }
            })
            .boxed();

        info!("✓ Redis pub/sub connection opened");
        Ok(MessageListener::new(
            Box::new(RedisSubscriptionSink(sink)),
            messages,
        ))
    }
}

struct RedisSubscriptionSink(PubSubSink);

impl SubscriptionSink for RedisSubscriptionSink {
    fn subscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.0.subscribe(channel).await?) })
    }

    fn unsubscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.0.unsubscribe(channel).await?) })
    }
}
