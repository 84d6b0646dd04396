//! High-level cache service over a key-value store.
//!
//! [`CacheService`] exposes two faces of the same backend:
//!
//! - a generic cache (`get` / `set` / `del` / `reset`) with typed values,
//!   a codec, namespacing and a TTL policy;
//! - raw store commands (`keys`, `publish`, `subscribe`, `incr`, `zadd`,
//!   `hget`, `exists`, `setex`, ...) for what the generic cache cannot say.
//!
//! Raw commands take store keys verbatim; the namespace only applies to the
//! generic interface.

use crate::backend::StoreCommands;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::key::KeyNamespace;
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::pubsub::SubscriptionDispatcher;
use crate::serialization::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache and raw-command facade over one shared backend.
///
/// Cloning is cheap: clones share the backend handle, the metrics sink and
/// the pub/sub listener.
///
/// # Example
///
/// ```
/// # use kvbridge::{CacheService, backend::InMemoryBackend};
/// # async fn example() -> kvbridge::Result<()> {
/// let cache = CacheService::new(InMemoryBackend::new());
///
/// cache.set("greeting", "hello", None).await?;
/// let value: Option<String> = cache.get("greeting").await?;
/// assert_eq!(value.as_deref(), Some("hello"));
///
/// assert_eq!(cache.incr("visits").await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheService<B: StoreCommands> {
    backend: B,
    dispatcher: Arc<SubscriptionDispatcher>,
    metrics: Arc<dyn CacheMetrics>,
    namespace: KeyNamespace,
    codec: Codec,
    ttl_policy: TtlPolicy,
    command_timeout: Option<Duration>,
}

impl<B: StoreCommands> CacheService<B> {
    /// Create a service with JSON values, no namespace and no default TTL.
    pub fn new(backend: B) -> Self {
        CacheService {
            backend,
            dispatcher: Arc::new(SubscriptionDispatcher::new()),
            metrics: Arc::new(NoOpMetrics),
            namespace: KeyNamespace::none(),
            codec: Codec::default(),
            ttl_policy: TtlPolicy::default(),
            command_timeout: None,
        }
    }

    /// Create a service using the cache settings of `config`.
    pub fn from_config(backend: B, config: &StoreConfig) -> Self {
        let service = CacheService::new(backend)
            .with_namespace(KeyNamespace::from_option(config.namespace.as_deref()))
            .with_codec(config.codec)
            .with_ttl_policy(TtlPolicy::from_default(config.default_ttl));

        match config.command_timeout {
            Some(limit) => service.with_timeout(limit),
            None => service,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = Arc::from(metrics);
        self
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    pub fn with_namespace(mut self, namespace: KeyNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Fail any single call that takes longer than `limit` with `Error::Timeout`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = Some(limit);
        self
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    // ------------------------------------------------------------------
    // Generic cache interface
    // ------------------------------------------------------------------

    /// Fetch and decode the value stored under `key`.
    ///
    /// Returns `Ok(None)` for absent or expired keys.
    ///
    /// # Errors
    ///
    /// - `Error::StoreUnavailable` / `Error::Timeout`: store unreachable
    /// - `Error::DeserializationError`: stored bytes don't decode as `T`
    /// - `Error::InvalidCacheEntry` / `Error::VersionMismatch`: foreign or
    ///   stale envelope (postcard codec)
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let timer = Instant::now();
        let store_key = self.namespace.key(key);

        let bytes = match self.bounded("GET", self.backend.get(&store_key)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_error(&store_key, &e.to_string());
                return Err(e);
            }
        };

        match bytes {
            Some(bytes) => {
                let value = self.codec.decode(&bytes).map_err(|e| {
                    self.metrics.record_error(&store_key, &e.to_string());
                    e
                })?;
                self.metrics.record_hit(&store_key, timer.elapsed());
                Ok(Some(value))
            }
            None => {
                self.metrics.record_miss(&store_key, timer.elapsed());
                Ok(None)
            }
        }
    }

    /// Encode and store `value` under `key`.
    ///
    /// With `ttl == None` the service's [`TtlPolicy`] decides the expiry.
    /// An existing value is overwritten.
    ///
    /// # Errors
    ///
    /// - `Error::SerializationError`: `value` cannot be encoded
    /// - `Error::StoreUnavailable` / `Error::Timeout`: store unreachable
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let timer = Instant::now();
        let store_key = self.namespace.key(key);
        let ttl = ttl.or_else(|| self.ttl_policy.get_ttl(key));
        let bytes = self.codec.encode(value)?;

        match self
            .bounded("SET", self.backend.set(&store_key, bytes, ttl))
            .await
        {
            Ok(()) => {
                self.metrics.record_set(&store_key, timer.elapsed());
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error(&store_key, &e.to_string());
                Err(e)
            }
        }
    }

    /// Remove `key`. Absent keys are not an error.
    pub async fn del(&self, key: &str) -> Result<()> {
        let timer = Instant::now();
        let store_key = self.namespace.key(key);

        match self.bounded("DEL", self.backend.delete(&store_key)).await {
            Ok(()) => {
                self.metrics.record_delete(&store_key, timer.elapsed());
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error(&store_key, &e.to_string());
                Err(e)
            }
        }
    }

    /// Empty the cache.
    ///
    /// With a namespace only keys under it are removed; without one the whole
    /// logical database is flushed, including keys written through the raw
    /// interface or by other clients.
    pub async fn reset(&self) -> Result<()> {
        match self.namespace.match_all() {
            Some(pattern) => {
                let removed = self
                    .bounded("RESET", self.backend.delete_matching(&pattern))
                    .await?;
                warn!("Cache reset: {} keys removed under {}", removed, pattern);
            }
            None => {
                self.bounded("RESET", self.backend.clear_all()).await?;
                warn!("Cache reset: logical database cleared");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Raw store access
    // ------------------------------------------------------------------

    /// The underlying store client.
    ///
    /// Escape hatch for commands not wrapped here; nothing the caller does
    /// through it is checked by the service.
    pub fn client(&self) -> &B {
        &self.backend
    }

    /// All keys matching a glob pattern.
    ///
    /// Walks the whole keyspace in one blocking store command. Keep it to
    /// small namespaces and admin tooling.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.bounded("KEYS", self.backend.keys(pattern)).await
    }

    /// Publish `message` on `channel`; returns how many subscribers got it.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        self.bounded("PUBLISH", self.backend.publish(channel, message))
            .await
    }

    /// Run `callback` for every message later published on `channel`.
    ///
    /// All subscriptions of this service (and its clones) share one listener
    /// connection. Registering a second callback on a channel adds to it; each
    /// callback sees each message once.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.bounded(
            "SUBSCRIBE",
            self.dispatcher.subscribe(&self.backend, channel, callback),
        )
        .await
    }

    /// Remove every callback on `channel`; returns how many were removed.
    pub async fn unsubscribe(&self, channel: &str) -> Result<usize> {
        self.bounded("UNSUBSCRIBE", self.dispatcher.unsubscribe(channel))
            .await
    }

    /// Reopen the pub/sub listener if its connection dropped, restoring every
    /// channel that still has callbacks. Returns `true` if it was reopened.
    ///
    /// `subscribe` does the same on its own; this is for services that only
    /// listen.
    pub async fn resubscribe(&self) -> Result<bool> {
        self.bounded("RESUBSCRIBE", self.dispatcher.reconnect(&self.backend))
            .await
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.bounded("INCR", self.backend.incr(key)).await
    }

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64> {
        self.bounded("ZADD", self.backend.zadd(key, score, member))
            .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.bounded("HGET", self.backend.hget(key, field)).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<u64> {
        self.bounded("HSET", self.backend.hset(key, field, value))
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<u64> {
        self.bounded("EXISTS", self.backend.exists(key)).await
    }

    /// Set `key` to `value` expiring after `ttl`, in a single command.
    pub async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<String> {
        self.bounded("SETEX", self.backend.setex(key, ttl, value))
            .await
    }

    /// Remaining lifetime of `key`; `Ok(None)` if it never expires.
    ///
    /// # Errors
    /// `Error::NotFound` if the key does not exist.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.bounded("TTL", self.backend.ttl(key)).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn health_check(&self) -> Result<bool> {
        self.bounded("PING", self.backend.health_check()).await
    }

    /// Stop the pub/sub listener and release the store connections.
    ///
    /// Affects every clone of this service.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.backend.close().await;
        info!("✓ Cache service shut down");
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!("{} exceeded command timeout of {:?}", op, limit);
                Error::Timeout(format!("{} exceeded {:?}", op, limit))
            })?,
            None => fut.await,
        }
    }
}
