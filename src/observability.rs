//! Metrics hooks and TTL policy for the generic cache interface.
//!
//! # Metrics
//!
//! Implement [`CacheMetrics`] to feed your monitoring system:
//!
//! ```ignore
//! use kvbridge::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!     }
//! }
//!
//! let cache = CacheService::new(backend).with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! The trait's default methods log through the `log` crate; [`NoOpMetrics`]
//! (the service default) discards everything.
//!
//! # TTL Policies
//!
//! A policy decides the expiry of `set` calls that pass no explicit TTL:
//!
//! | Policy | Effect |
//! |--------|--------|
//! | `Default` | No expiry from this layer; store policy applies |
//! | `Fixed(d)` | Every entry expires after `d` |
//! | `Infinite` | Never expire |
//! | `PerPrefix(f)` | `f(prefix)` where prefix is the key up to the first `:` |

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record a cache delete operation.
    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("Cache DELETE: {} took {:?}", key, duration);
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics implementation that keeps the trait's logging defaults.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}

/// TTL (Time-to-Live) policy for entries written without an explicit TTL.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Leave expiry to the store
    #[default]
    Default,

    /// Fixed duration for all entries
    Fixed(Duration),

    /// No TTL (entries live until deleted or evicted)
    Infinite,

    /// Duration chosen from the key's leading segment
    PerPrefix(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// Policy matching an optional configured default TTL.
    pub fn from_default(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(d) => TtlPolicy::Fixed(d),
            None => TtlPolicy::Default,
        }
    }

    /// Get TTL for a caller key (namespace not included).
    pub fn get_ttl(&self, key: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Default => None,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::Infinite => None,
            TtlPolicy::PerPrefix(f) => {
                let prefix = key.split(crate::key::SEPARATOR).next().unwrap_or(key);
                Some(f(prefix))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("key", Duration::from_secs(1));
        metrics.record_miss("key", Duration::from_secs(2));
        metrics.record_error("key", "boom");
    }

    #[test]
    fn test_ttl_policy_default() {
        assert_eq!(TtlPolicy::Default.get_ttl("any"), None);
        assert_eq!(TtlPolicy::Infinite.get_ttl("any"), None);
    }

    #[test]
    fn test_ttl_policy_from_default() {
        let policy = TtlPolicy::from_default(Some(Duration::from_secs(3600)));
        assert_eq!(policy.get_ttl("x"), Some(Duration::from_secs(3600)));
        assert_eq!(TtlPolicy::from_default(None).get_ttl("x"), None);
    }

    #[test]
    fn test_ttl_policy_per_prefix() {
        let policy = TtlPolicy::PerPrefix(|prefix| match prefix {
            "session" => Duration::from_secs(1800),
            _ => Duration::from_secs(600),
        });

        assert_eq!(
            policy.get_ttl("session:abc"),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(policy.get_ttl("user:1"), Some(Duration::from_secs(600)));
        assert_eq!(policy.get_ttl("plain"), Some(Duration::from_secs(600)));
    }
}
