//! In-memory store backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding and
//! mirrors the store semantics the service relies on: lazy TTL expiry,
//! typed values (strings, hashes, sorted sets) with WRONGTYPE errors, atomic
//! per-key updates, and an in-process pub/sub hub.

use super::{CacheBackend, StoreCommands};
use crate::error::{Error, Result};
use crate::key::glob_match;
use crate::pubsub::{Message, MessageListener, SubscriptionSink};
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Clone, Debug)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, f64>),
}

/// In-memory entry with optional expiration.
#[derive(Clone, Debug)]
struct StoreEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoreEntry { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Thread-safe async in-memory store backend.
///
/// Clones share the same keyspace and pub/sub hub.
///
/// # Example
///
/// ```no_run
/// use kvbridge::backend::{InMemoryBackend, CacheBackend, StoreCommands};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("key1", b"value".to_vec(), None).await?;
///     assert!(backend.get("key1").await?.is_some());
///
///     assert_eq!(backend.incr("hits").await?, 1);
///     backend.setex("otp", Duration::from_secs(30), "123456").await?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoreEntry>>,
    hub: Arc<PubSubHub>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        self.store.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open pub/sub listener connections.
    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }

    /// Close every open pub/sub listener as if its connection had dropped.
    ///
    /// Their message streams end and their sinks start failing.
    pub fn disconnect_listeners(&self) -> usize {
        let closed = self.hub.with_listeners(|listeners| {
            let closed = listeners.len();
            listeners.clear();
            closed
        });
        debug!("InMemory closed {} pub/sub listener(s)", closed);
        closed
    }

    /// Drop expired entries eagerly.
    pub fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let purged = before.saturating_sub(self.store.len());
        if purged > 0 {
            debug!("InMemory purged {} expired keys", purged);
        }
        purged
    }

    fn live<R>(&self, key: &str, f: impl FnOnce(&StoreEntry) -> R) -> Option<R> {
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => return Some(f(&*entry)),
            Some(_) => true,
            None => false,
        };

        // The read guard is released above; removing under it would deadlock
        // on the shard lock.
        if expired {
            self.store.remove_if(key, |_, e| e.is_expired());
        }
        None
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = match self.live(key, |entry| entry.value.clone()) {
            Some(Value::Bytes(bytes)) => Some(bytes),
            Some(_) => return Err(Error::CommandFailed(WRONGTYPE.to_string())),
            None => None,
        };

        if value.is_some() {
            debug!("✓ InMemory GET {} -> HIT", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store
            .insert(key.to_string(), StoreEntry::new(Value::Bytes(value), ttl));

        match ttl {
            Some(d) => debug!("✓ InMemory SET {} (TTL: {:?})", key, d),
            None => debug!("✓ InMemory SET {}", key),
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let before = self.store.len();
        self.store.retain(|key, _| !glob_match(pattern, key));
        let removed = before.saturating_sub(self.store.len()) as u64;
        debug!("✓ InMemory DELETE MATCHING {} ({} keys)", pattern, removed);
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        warn!("⚠ InMemory CLEAR_ALL executed - all keys cleared!");
        Ok(())
    }
}

impl StoreCommands for InMemoryBackend {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|e| !e.is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        debug!("✓ InMemory KEYS {} -> {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let receivers = self.hub.publish(channel, message);
        debug!("✓ InMemory PUBLISH {} -> {} receivers", channel, receivers);
        Ok(receivers)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(Value::Bytes(b"0".to_vec()), None));
        if entry.is_expired() {
            *entry = StoreEntry::new(Value::Bytes(b"0".to_vec()), None);
        }

        let current = match &entry.value {
            Value::Bytes(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::CommandFailed("ERR value is not an integer or out of range".into())
                })?,
            _ => return Err(Error::CommandFailed(WRONGTYPE.to_string())),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::CommandFailed("ERR increment or decrement would overflow".into()))?;

        // INCR keeps any existing expiry
        entry.value = Value::Bytes(next.to_string().into_bytes());
        debug!("✓ InMemory INCR {} -> {}", key, next);
        Ok(next)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64> {
        if score.is_nan() {
            return Err(Error::CommandFailed("ERR value is not a valid float".into()));
        }

        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(Value::SortedSet(HashMap::new()), None));
        if entry.is_expired() {
            *entry = StoreEntry::new(Value::SortedSet(HashMap::new()), None);
        }

        let added = match &mut entry.value {
            Value::SortedSet(members) => match members.insert(member.to_string(), score) {
                Some(_) => 0,
                None => 1,
            },
            _ => return Err(Error::CommandFailed(WRONGTYPE.to_string())),
        };
        debug!("✓ InMemory ZADD {} {} {} -> {}", key, score, member, added);
        Ok(added)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.live(key, |entry| match &entry.value {
            Value::Hash(fields) => Ok(fields.get(field).cloned()),
            _ => Err(Error::CommandFailed(WRONGTYPE.to_string())),
        }) {
            Some(result) => result,
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<u64> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(Value::Hash(HashMap::new()), None));
        if entry.is_expired() {
            *entry = StoreEntry::new(Value::Hash(HashMap::new()), None);
        }

        match &mut entry.value {
            Value::Hash(fields) => match fields.insert(field.to_string(), value.to_string()) {
                Some(_) => Ok(0),
                None => Ok(1),
            },
            _ => Err(Error::CommandFailed(WRONGTYPE.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<u64> {
        Ok(self.live(key, |_| 1).unwrap_or(0))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<String> {
        if ttl.as_millis() == 0 {
            return Err(Error::CommandFailed(
                "ERR invalid expire time in 'psetex' command".into(),
            ));
        }
        self.store.insert(
            key.to_string(),
            StoreEntry::new(Value::Bytes(value.as_bytes().to_vec()), Some(ttl)),
        );
        debug!("✓ InMemory SETEX {} (TTL: {:?})", key, ttl);
        Ok("OK".to_string())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        match self.live(key, |entry| entry.expires_at) {
            Some(Some(at)) => Ok(Some(at.saturating_duration_since(Instant::now()))),
            Some(None) => Ok(None),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn open_listener(&self) -> Result<MessageListener> {
        let (id, rx) = self.hub.register();
        let sink = HubSink {
            hub: Arc::clone(&self.hub),
            id,
        };
        debug!("✓ InMemory pub/sub listener {} opened", id);
        Ok(MessageListener::new(Box::new(sink), rx.boxed()))
    }
}

// ============================================================================
// In-process pub/sub hub
// ============================================================================

struct HubListener {
    id: u64,
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct PubSubHub {
    listeners: Mutex<Vec<HubListener>>,
    next_id: AtomicU64,
}

impl PubSubHub {
    fn register(&self) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded();
        self.with_listeners(|listeners| {
            listeners.push(HubListener {
                id,
                channels: HashSet::new(),
                tx,
            })
        });
        (id, rx)
    }

    fn publish(&self, channel: &str, payload: &str) -> u64 {
        self.with_listeners(|listeners| {
            // Closed listeners are pruned as they are discovered.
            listeners.retain(|l| !l.tx.is_closed());

            let mut receivers = 0;
            for listener in listeners.iter().filter(|l| l.channels.contains(channel)) {
                let message = Message {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if listener.tx.unbounded_send(message).is_ok() {
                    receivers += 1;
                }
            }
            receivers
        })
    }

    fn update_channels(&self, id: u64, f: impl FnOnce(&mut HashSet<String>)) -> Result<()> {
        self.with_listeners(|listeners| {
            match listeners.iter_mut().find(|l| l.id == id && !l.tx.is_closed()) {
                Some(listener) => {
                    f(&mut listener.channels);
                    Ok(())
                }
                None => Err(Error::StoreUnavailable(format!(
                    "pub/sub listener {} is closed",
                    id
                ))),
            }
        })
    }

    fn listener_count(&self) -> usize {
        self.with_listeners(|listeners| listeners.iter().filter(|l| !l.tx.is_closed()).count())
    }

    fn with_listeners<R>(&self, f: impl FnOnce(&mut Vec<HubListener>) -> R) -> R {
        match self.listeners.lock() {
            Ok(mut listeners) => f(&mut listeners),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

struct HubSink {
    hub: Arc<PubSubHub>,
    id: u64,
}

impl SubscriptionSink for HubSink {
    fn subscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.hub.update_channels(self.id, |channels| {
                channels.insert(channel.to_string());
            })
        })
    }

    fn unsubscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.hub.update_channels(self.id, |channels| {
                channels.remove(channel);
            })
        })
    }
}

impl Drop for HubSink {
    fn drop(&mut self) {
        let id = self.id;
        self.hub
            .with_listeners(|listeners| listeners.retain(|l| l.id != id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_backend_set_get() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");

        let result = backend.get("key1").await.expect("Failed to get");
        assert_eq!(result, Some(b"value1".to_vec()));
    }

    #[tokio::test]
    async fn test_inmemory_backend_miss() {
        let backend = InMemoryBackend::new();

        let result = backend.get("nonexistent").await.expect("Failed to get");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_inmemory_backend_ttl_expiration() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), Some(Duration::from_millis(100)))
            .await
            .expect("Failed to set");

        assert!(backend.get("key1").await.expect("Failed to get").is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(backend.get("key1").await.expect("Failed to get").is_none());
        assert_eq!(backend.exists("key1").await.expect("Failed"), 0);
    }

    #[tokio::test]
    async fn test_inmemory_backend_delete_matching() {
        let backend = InMemoryBackend::new();
        for key in ["app:a", "app:b", "other:c"] {
            backend
                .set(key, b"v".to_vec(), None)
                .await
                .expect("Failed to set");
        }

        let removed = backend
            .delete_matching("app:*")
            .await
            .expect("Failed to delete");

        assert_eq!(removed, 2);
        assert_eq!(backend.len(), 1);
        assert!(backend.get("other:c").await.expect("Failed").is_some());
    }

    #[tokio::test]
    async fn test_inmemory_incr() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.incr("counter").await.expect("Failed"), 1);
        assert_eq!(backend.incr("counter").await.expect("Failed"), 2);
        assert_eq!(
            backend.get("counter").await.expect("Failed"),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_inmemory_incr_non_integer() {
        let backend = InMemoryBackend::new();
        backend
            .set("text", b"hello".to_vec(), None)
            .await
            .expect("Failed to set");

        let result = backend.incr("text").await;
        assert!(matches!(result, Err(Error::CommandFailed(_))));
    }

    #[tokio::test]
    async fn test_inmemory_incr_keeps_ttl() {
        let backend = InMemoryBackend::new();
        backend
            .setex("counter", Duration::from_secs(60), "5")
            .await
            .expect("Failed to setex");

        assert_eq!(backend.incr("counter").await.expect("Failed"), 6);
        assert!(backend.ttl("counter").await.expect("Failed").is_some());
    }

    #[tokio::test]
    async fn test_inmemory_zadd_update_vs_insert() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.zadd("board", 1.0, "alice").await.expect("Failed"), 1);
        assert_eq!(backend.zadd("board", 5.0, "alice").await.expect("Failed"), 0);
        assert_eq!(backend.zadd("board", 2.0, "bob").await.expect("Failed"), 1);
        assert!(backend.zadd("board", f64::NAN, "eve").await.is_err());
    }

    #[tokio::test]
    async fn test_inmemory_hash() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.hset("user:1", "name", "Ada").await.expect("Failed"), 1);
        assert_eq!(backend.hset("user:1", "name", "Ada L").await.expect("Failed"), 0);
        assert_eq!(
            backend.hget("user:1", "name").await.expect("Failed"),
            Some("Ada L".to_string())
        );
        assert_eq!(backend.hget("user:1", "email").await.expect("Failed"), None);
        assert_eq!(backend.hget("missing", "name").await.expect("Failed"), None);
    }

    #[tokio::test]
    async fn test_inmemory_wrongtype() {
        let backend = InMemoryBackend::new();
        backend
            .hset("h", "f", "v")
            .await
            .expect("Failed to hset");

        assert!(matches!(
            backend.get("h").await,
            Err(Error::CommandFailed(_))
        ));
        assert!(matches!(
            backend.zadd("h", 1.0, "m").await,
            Err(Error::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_setex_and_ttl() {
        let backend = InMemoryBackend::new();

        let reply = backend
            .setex("otp", Duration::from_secs(30), "123456")
            .await
            .expect("Failed to setex");
        assert_eq!(reply, "OK");

        let ttl = backend.ttl("otp").await.expect("Failed to ttl");
        assert!(ttl.is_some_and(|d| d <= Duration::from_secs(30)));

        backend
            .set("forever", b"x".to_vec(), None)
            .await
            .expect("Failed to set");
        assert_eq!(backend.ttl("forever").await.expect("Failed"), None);

        assert!(matches!(
            backend.ttl("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(backend.setex("bad", Duration::ZERO, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_inmemory_setex_sub_second() {
        let backend = InMemoryBackend::new();

        backend
            .setex("flash", Duration::from_millis(500), "x")
            .await
            .expect("Sub-second TTL must be accepted");
        let ttl = backend
            .ttl("flash")
            .await
            .expect("Failed to ttl")
            .expect("Key should expire");
        assert!(ttl > Duration::ZERO && ttl <= Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.exists("flash").await.expect("Failed"), 0);

        assert!(matches!(
            backend.setex("tiny", Duration::from_micros(500), "x").await,
            Err(Error::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_disconnect_listeners_ends_stream() {
        let backend = InMemoryBackend::new();
        let (mut sink, mut messages) = backend
            .open_listener()
            .await
            .expect("Failed to open listener")
            .into_parts();
        sink.subscribe("news").await.expect("Failed to subscribe");

        assert_eq!(backend.disconnect_listeners(), 1);

        assert!(messages.next().await.is_none());
        assert_eq!(backend.publish("news", "hi").await.expect("Failed"), 0);
        assert!(sink.subscribe("other").await.is_err());
    }

    #[tokio::test]
    async fn test_inmemory_keys_pattern() {
        let backend = InMemoryBackend::new();
        for key in ["user:1", "user:2", "session:1"] {
            backend
                .set(key, b"v".to_vec(), None)
                .await
                .expect("Failed to set");
        }

        let mut keys = backend.keys("user:*").await.expect("Failed to list keys");
        keys.sort();
        assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn test_inmemory_publish_without_listener() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.publish("news", "hi").await.expect("Failed"), 0);
    }

    #[tokio::test]
    async fn test_inmemory_listener_receives() {
        let backend = InMemoryBackend::new();
        let (mut sink, mut messages) = backend
            .open_listener()
            .await
            .expect("Failed to open listener")
            .into_parts();

        sink.subscribe("news").await.expect("Failed to subscribe");
        assert_eq!(backend.publish("news", "hi").await.expect("Failed"), 1);
        assert_eq!(backend.publish("other", "x").await.expect("Failed"), 0);

        let message = messages.next().await.expect("Stream ended");
        assert_eq!(
            message,
            Message {
                channel: "news".to_string(),
                payload: "hi".to_string()
            }
        );

        drop(sink);
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_inmemory_backend_clear_all() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        backend.incr("key2").await.expect("Failed to incr");

        assert_eq!(backend.len(), 2);
        backend.clear_all().await.expect("Failed to clear");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_backend_thread_safe() {
        let backend = InMemoryBackend::new();
        let mut handles = vec![];

        for _ in 0..10 {
            let b = backend.clone();
            handles.push(tokio::spawn(async move {
                b.incr("shared").await.expect("Failed to incr");
            }));
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }

        assert_eq!(
            backend.get("shared").await.expect("Failed"),
            Some(b"10".to_vec())
        );
    }
}
