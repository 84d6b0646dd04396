//! Pub/sub dispatch.
//!
//! A store connection in subscribe mode delivers every message of every
//! subscribed channel on one stream. Attaching one handler per `subscribe`
//! call would run every handler on every message. Instead a
//! [`SubscriptionDispatcher`] owns a single listener connection and a
//! channel-keyed table of callbacks:
//!
//! ```text
//!   store ──(one pub/sub connection)──► listener task
//!                                           │ lookup by channel
//!                          ┌────────────────┼────────────────┐
//!                     "orders" → [cb1, cb2]   "audit" → [cb3]   ...
//! ```
//!
//! `SUBSCRIBE` is sent to the store only the first time a channel is seen.

use crate::backend::StoreCommands;
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// A message received on a subscribed channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Control half of a listener connection.
pub trait SubscriptionSink: Send + Sync {
    fn subscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>>;
    fn unsubscribe<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// A listener connection: subscription control plus the shared message stream.
pub struct MessageListener {
    sink: Box<dyn SubscriptionSink>,
    messages: BoxStream<'static, Message>,
}

impl MessageListener {
    pub fn new(sink: Box<dyn SubscriptionSink>, messages: BoxStream<'static, Message>) -> Self {
        MessageListener { sink, messages }
    }

    pub fn into_parts(self) -> (Box<dyn SubscriptionSink>, BoxStream<'static, Message>) {
        (self.sink, self.messages)
    }
}

/// Callback invoked with the payload of each message on its channel.
pub type Callback = Arc<dyn Fn(String) + Send + Sync>;

type Routes = Arc<DashMap<String, Vec<Callback>>>;

/// Open listener connection and the channels the store has confirmed on it.
struct ListenerState {
    sink: Box<dyn SubscriptionSink>,
    subscribed: HashSet<String>,
}

/// One listener per connection, demultiplexing into per-channel callbacks.
///
/// If the listener's message stream ends (connection dropped), the next
/// [`subscribe`](Self::subscribe) or [`reconnect`](Self::reconnect) opens a
/// fresh listener and re-subscribes every channel that still has callbacks.
#[derive(Default)]
pub struct SubscriptionDispatcher {
    routes: Routes,
    state: tokio::sync::Mutex<Option<ListenerState>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `channel`, opening the listener on first use.
    ///
    /// # Errors
    /// Returns `Err` if the listener connection cannot be opened or the store
    /// rejects the subscription. A failed or cancelled subscription leaves no
    /// callback registered.
    pub async fn subscribe<B, F>(&self, backend: &B, channel: &str, callback: F) -> Result<()>
    where
        B: StoreCommands,
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut guard = self.state.lock().await;

        if !self.is_listening() {
            guard.take();
        }
        if guard.is_none() {
            *guard = Some(self.open(backend).await?);
        }

        let state = guard
            .as_mut()
            .ok_or_else(|| Error::StoreUnavailable("pub/sub listener not running".to_string()))?;

        // Route before SUBSCRIBE so nothing delivered right after the
        // confirmation is dropped. The route is withdrawn unless confirmed.
        let pending = PendingRoute::push(&self.routes, channel, Arc::new(callback));

        if state.subscribed.contains(channel) {
            debug!("✓ Added callback to existing subscription {}", channel);
        } else {
            state.sink.subscribe(channel).await?;
            state.subscribed.insert(channel.to_string());
            debug!("✓ SUBSCRIBE {}", channel);
        }

        pending.confirm();
        Ok(())
    }

    /// Drop every callback for `channel` and unsubscribe from it.
    ///
    /// Returns the number of callbacks removed.
    ///
    /// # Errors
    /// Returns `Err` if the store rejects the unsubscribe.
    pub async fn unsubscribe(&self, channel: &str) -> Result<usize> {
        let mut guard = self.state.lock().await;

        let removed = match self.routes.remove(channel) {
            Some((_, callbacks)) => callbacks.len(),
            None => return Ok(0),
        };

        let listening = self.is_listening();
        if let Some(state) = guard.as_mut() {
            if state.subscribed.remove(channel) && listening {
                state.sink.unsubscribe(channel).await?;
                debug!("✓ UNSUBSCRIBE {}", channel);
            }
        }

        Ok(removed)
    }

    /// Reopen the listener if its stream has ended and re-subscribe every
    /// channel that still has callbacks.
    ///
    /// Returns `true` if a new listener was opened.
    ///
    /// # Errors
    /// Returns `Err` if the connection cannot be opened or a channel cannot
    /// be re-subscribed. The next call retries.
    pub async fn reconnect<B: StoreCommands>(&self, backend: &B) -> Result<bool> {
        let mut guard = self.state.lock().await;

        if self.is_listening() || self.routes.is_empty() {
            return Ok(false);
        }

        guard.take();
        *guard = Some(self.open(backend).await?);
        Ok(true)
    }

    /// Number of callbacks registered for `channel`.
    pub fn callback_count(&self, channel: &str) -> usize {
        self.routes.get(channel).map(|c| c.len()).unwrap_or(0)
    }

    /// Channels with at least one callback.
    pub fn channels(&self) -> Vec<String> {
        self.routes.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether a listener is open and its message stream is still running.
    pub fn is_listening(&self) -> bool {
        self.listener_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the listener and forget every callback.
    pub async fn shutdown(&self) {
        let mut guard = self.state.lock().await;
        guard.take();
        self.routes.clear();

        let task = match self.listener_task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
            info!("Pub/sub listener stopped");
        }
    }

    /// Open a listener and subscribe it to every routed channel.
    async fn open<B: StoreCommands>(&self, backend: &B) -> Result<ListenerState> {
        let (mut sink, messages) = backend.open_listener().await?.into_parts();

        let mut subscribed = HashSet::new();
        for channel in self.channels() {
            sink.subscribe(&channel).await?;
            subscribed.insert(channel);
        }
        if !subscribed.is_empty() {
            info!("Re-subscribed {} channel(s) on new listener", subscribed.len());
        }

        self.start_listener(messages);
        Ok(ListenerState { sink, subscribed })
    }

    fn start_listener(&self, messages: BoxStream<'static, Message>) {
        let handle = tokio::spawn(dispatch(messages, Arc::clone(&self.routes)));
        let previous = match self.listener_task.lock() {
            Ok(mut task) => task.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("Pub/sub listener started");
    }
}

impl Drop for SubscriptionDispatcher {
    fn drop(&mut self) {
        if let Ok(mut task) = self.listener_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// A callback routed ahead of its SUBSCRIBE; removed again on drop unless
/// confirmed.
struct PendingRoute<'a> {
    routes: &'a Routes,
    channel: &'a str,
    callback: Option<Callback>,
}

impl<'a> PendingRoute<'a> {
    fn push(routes: &'a Routes, channel: &'a str, callback: Callback) -> Self {
        routes
            .entry(channel.to_string())
            .or_default()
            .push(Arc::clone(&callback));
        PendingRoute {
            routes,
            channel,
            callback: Some(callback),
        }
    }

    fn confirm(mut self) {
        self.callback = None;
    }
}

impl Drop for PendingRoute<'_> {
    fn drop(&mut self) {
        let Some(callback) = self.callback.take() else {
            return;
        };

        let now_empty = match self.routes.get_mut(self.channel) {
            Some(mut callbacks) => {
                callbacks.retain(|c| !Arc::ptr_eq(c, &callback));
                callbacks.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.routes.remove_if(self.channel, |_, c| c.is_empty());
        }
        debug!("Withdrew unconfirmed callback on {}", self.channel);
    }
}

async fn dispatch(mut messages: BoxStream<'static, Message>, routes: Routes) {
    while let Some(message) = messages.next().await {
        // Clone out of the map so callbacks may (un)subscribe without
        // deadlocking on the shard lock.
        let callbacks = match routes.get(&message.channel) {
            Some(callbacks) => callbacks.value().clone(),
            None => {
                trace!("Dropping message on unrouted channel {}", message.channel);
                continue;
            }
        };

        for callback in callbacks {
            callback(message.payload.clone());
        }
    }

    warn!(
        "Pub/sub message stream ended; {} channel(s) wait for the listener to reopen",
        routes.len()
    );
}
