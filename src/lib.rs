//! # kvbridge
//!
//! Data-access layer over a key-value store and a primary data store.
//!
//! ## Features
//!
//! - **Dual-interface cache:** typed `get` / `set` / `del` / `reset` plus raw
//!   store commands (pattern search, pub/sub, counters, sorted sets, hashes,
//!   TTL-scoped writes)
//! - **Backends:** in-memory (default) and Redis via deadpool-redis
//! - **Store reset:** clears every data collection of the primary store,
//!   refusing to run in production
//! - **Production Ready:** logging through `log`, metrics hooks, typed errors
//!
//! ## Quick Start
//!
//! ```ignore
//! use kvbridge::{CacheService, StoreConfig, backend::RedisBackend};
//!
//! let config = StoreConfig::load()?;
//! let backend = RedisBackend::new(&config).await?;
//! let cache = CacheService::from_config(backend, &config);
//!
//! cache.set("user:1", &user, None).await?;
//! let cached: Option<User> = cache.get("user:1").await?;
//!
//! cache.subscribe("invalidate", |key| println!("evict {}", key)).await?;
//! cache.publish("invalidate", "user:1").await?;
//! ```
//!
//! ### Resetting a test database
//!
//! ```ignore
//! use kvbridge::{StoreResetService, postgres::PgCollectionSource};
//!
//! let source = PgCollectionSource::connect(&config).await?;
//! let reset = StoreResetService::new(source, config.environment.clone());
//! reset.clean_database().await?; // no-op in production
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod collection;
pub mod config;
pub mod error;
pub mod key;
pub mod observability;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod pubsub;
pub mod reset;
pub mod serialization;
pub mod service;

// Re-exports for convenience
pub use backend::{CacheBackend, StoreCommands};
pub use collection::{BulkClear, CollectionDescriptor, CollectionRegistry, CollectionSource};
pub use config::{Environment, StoreConfig};
pub use error::{Error, Result};
pub use reset::{ResetReport, StoreResetService};
pub use serialization::Codec;
pub use service::CacheService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
