//! Entity collections of the primary data store.
//!
//! A collection is a named set of rows (a table, a model) that may expose a
//! bulk-clear capability. [`CollectionSource`] yields the collections at call
//! time, so a live store can report what currently exists:
//!
//! - [`CollectionRegistry`]: an explicit name → capability table filled at
//!   startup.
//! - `PgCollectionSource` (feature `postgres`): public tables read from
//!   `information_schema`.
//!
//! # Example
//!
//! ```
//! use kvbridge::collection::{CollectionRegistry, InMemoryCollection};
//! use std::sync::Arc;
//!
//! let users = Arc::new(InMemoryCollection::new());
//! let mut registry = CollectionRegistry::new();
//! registry.register("users", users.clone());
//! registry.register_without_clear("audit_view");
//! assert_eq!(registry.len(), 2);
//! ```

use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Removes every member of one collection in a single call.
pub trait BulkClear: Send + Sync {
    /// Clear the collection; returns how many members were removed.
    fn clear_all(&self) -> BoxFuture<'_, Result<u64>>;
}

/// A named collection and, optionally, its bulk-clear capability.
#[derive(Clone)]
pub struct CollectionDescriptor {
    name: String,
    clear: Option<Arc<dyn BulkClear>>,
}

impl CollectionDescriptor {
    pub fn new(name: impl Into<String>, clear: Arc<dyn BulkClear>) -> Self {
        CollectionDescriptor {
            name: name.into(),
            clear: Some(clear),
        }
    }

    /// A collection that cannot be bulk-cleared (a view, a read-only model).
    pub fn without_clear(name: impl Into<String>) -> Self {
        CollectionDescriptor {
            name: name.into(),
            clear: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_clear(&self) -> bool {
        self.clear.is_some()
    }

    /// Clear every member.
    ///
    /// # Errors
    /// `Error::CapabilityUnsupported` when the collection has no bulk-clear
    /// capability; otherwise whatever the capability reports.
    pub async fn clear(&self) -> Result<u64> {
        match &self.clear {
            Some(clear) => clear.clear_all().await,
            None => Err(Error::CapabilityUnsupported(format!(
                "collection '{}' has no bulk clear",
                self.name
            ))),
        }
    }
}

impl std::fmt::Debug for CollectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionDescriptor")
            .field("name", &self.name)
            .field("supports_clear", &self.supports_clear())
            .finish()
    }
}

/// Provider of the collections that currently exist in a store.
#[allow(async_fn_in_trait)]
pub trait CollectionSource: Send + Sync {
    /// Enumerate collections. May include internal members; callers filter
    /// with [`is_data_collection`].
    ///
    /// # Errors
    /// Returns `Err` if the store cannot be queried.
    async fn collections(&self) -> Result<Vec<CollectionDescriptor>>;
}

/// Whether `name` denotes a data collection rather than an internal member
/// of the store client.
///
/// Rejected: empty names, names starting with `$` or `_` (client methods,
/// migration bookkeeping), `constructor`, and names starting with an
/// uppercase letter (type-level members).
pub fn is_data_collection(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    !(first == '$' || first == '_' || first.is_uppercase() || name == "constructor")
}

/// Explicit collection table populated at startup.
#[derive(Clone, Debug, Default)]
pub struct CollectionRegistry {
    collections: Vec<CollectionDescriptor>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clearable collection. Re-registering a name replaces it.
    pub fn register(&mut self, name: impl Into<String>, clear: Arc<dyn BulkClear>) -> &mut Self {
        self.insert(CollectionDescriptor::new(name, clear))
    }

    pub fn register_without_clear(&mut self, name: impl Into<String>) -> &mut Self {
        self.insert(CollectionDescriptor::without_clear(name))
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.collections.iter().map(|c| c.name()).collect()
    }

    fn insert(&mut self, descriptor: CollectionDescriptor) -> &mut Self {
        match self
            .collections
            .iter_mut()
            .find(|c| c.name == descriptor.name)
        {
            Some(existing) => *existing = descriptor,
            None => self.collections.push(descriptor),
        }
        self
    }
}

impl CollectionSource for CollectionRegistry {
    async fn collections(&self) -> Result<Vec<CollectionDescriptor>> {
        Ok(self.collections.clone())
    }
}

impl<S: CollectionSource> CollectionSource for Arc<S> {
    async fn collections(&self) -> Result<Vec<CollectionDescriptor>> {
        self.as_ref().collections().await
    }
}

// ============================================================================
// In-Memory Collection
// ============================================================================

/// Row store for exercising reset logic without a database.
///
/// Clears can be made to fail with [`fail_clears`](Self::fail_clears).
#[derive(Debug, Default)]
pub struct InMemoryCollection {
    rows: DashMap<String, serde_json::Value>,
    fail: AtomicBool,
    clear_calls: AtomicUsize,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, row: serde_json::Value) {
        self.rows.insert(id.into(), row);
    }

    pub fn get(&self, id: &str) -> Option<serde_json::Value> {
        self.rows.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Make subsequent clears fail with `Error::CommandFailed`.
    pub fn fail_clears(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of clear attempts, failed ones included.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

impl BulkClear for InMemoryCollection {
    fn clear_all(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            self.clear_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::CommandFailed("bulk clear rejected".to_string()));
            }

            let removed = self.rows.len() as u64;
            self.rows.clear();
            debug!("✓ InMemory collection cleared ({} rows)", removed);
            Ok(removed)
        })
    }
}
