//! Redis Backend Integration Tests
//!
//! These tests require a running Redis instance and skip themselves when
//! none is reachable.
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7
//! cargo test --features redis --test redis_integration_test
//! ```
//!
//! ## Environment Variables
//!
//! - `TEST_REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
//!
//! Every test writes under its own `kvb:test:<name>` prefix so runs don't
//! interfere with each other or with other data in the database.

#![cfg(feature = "redis")]

use kvbridge::backend::{CacheBackend, RedisBackend};
use kvbridge::key::KeyNamespace;
use kvbridge::{CacheService, Error};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Helper: Get Redis connection URL from environment or use default
fn get_redis_url() -> String {
    env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Helper: Create a test Redis backend
async fn create_test_backend() -> Result<RedisBackend, Box<dyn std::error::Error>> {
    let backend = RedisBackend::from_connection_string(&get_redis_url()).await?;
    Ok(backend)
}

/// Helper: Check if Redis is available
async fn is_redis_available() -> bool {
    match create_test_backend().await {
        Ok(backend) => backend.health_check().await.unwrap_or(false),
        Err(_) => false,
    }
}

/// Helper: cache service scoped to one test
async fn scoped_service(test: &str) -> Option<CacheService<RedisBackend>> {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return None;
    }
    let backend = create_test_backend()
        .await
        .expect("Failed to create Redis backend");
    Some(
        CacheService::new(backend)
            .with_namespace(KeyNamespace::new(format!("kvb:test:{}", test))),
    )
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Product {
    sku: String,
    price_cents: u64,
}

#[tokio::test]
async fn test_redis_connection() {
    let Some(cache) = scoped_service("connection").await else {
        return;
    };

    assert!(cache.health_check().await.expect("Health check failed"));
    let stats = cache.client().pool_stats();
    assert!(stats.connections >= 1);
}

#[tokio::test]
async fn test_redis_set_get_del() {
    let Some(cache) = scoped_service("set_get_del").await else {
        return;
    };

    let product = Product {
        sku: "A-1".to_string(),
        price_cents: 1299,
    };

    cache.set("p1", &product, None).await.expect("SET failed");
    let cached: Option<Product> = cache.get("p1").await.expect("GET failed");
    assert_eq!(cached, Some(product));

    cache.del("p1").await.expect("DEL failed");
    cache.del("p1").await.expect("Second DEL failed");
    let cached: Option<Product> = cache.get("p1").await.expect("GET failed");
    assert_eq!(cached, None);
}

#[tokio::test]
async fn test_redis_ttl_expiration() {
    let Some(cache) = scoped_service("ttl").await else {
        return;
    };

    cache
        .set("short", &1u32, Some(Duration::from_millis(200)))
        .await
        .expect("SET failed");
    assert!(cache.get::<u32>("short").await.expect("GET failed").is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(cache.get::<u32>("short").await.expect("GET failed").is_none());
}

#[tokio::test]
async fn test_redis_namespaced_reset() {
    let Some(cache) = scoped_service("reset").await else {
        return;
    };
    let outside = "kvb:test:reset_outside";

    cache.set("a", &1u32, None).await.expect("SET failed");
    cache.set("b", &2u32, None).await.expect("SET failed");
    cache
        .setex(outside, Duration::from_secs(30), "keep")
        .await
        .expect("SETEX failed");

    cache.reset().await.expect("RESET failed");

    assert!(cache.get::<u32>("a").await.expect("GET failed").is_none());
    assert!(cache.get::<u32>("b").await.expect("GET failed").is_none());
    assert_eq!(cache.exists(outside).await.expect("EXISTS failed"), 1);

    cache.client().delete(outside).await.expect("Cleanup failed");
}

#[tokio::test]
async fn test_redis_raw_commands() {
    let Some(cache) = scoped_service("raw").await else {
        return;
    };
    let counter = "kvb:test:raw:counter";
    let board = "kvb:test:raw:board";
    let hash = "kvb:test:raw:hash";
    let otp = "kvb:test:raw:otp";
    for key in [counter, board, hash, otp] {
        cache.client().delete(key).await.expect("Cleanup failed");
    }

    assert_eq!(cache.incr(counter).await.expect("INCR failed"), 1);
    assert_eq!(cache.incr(counter).await.expect("INCR failed"), 2);

    assert_eq!(cache.zadd(board, 1.5, "m").await.expect("ZADD failed"), 1);
    assert_eq!(cache.zadd(board, 3.0, "m").await.expect("ZADD failed"), 0);

    assert_eq!(cache.hget(hash, "f").await.expect("HGET failed"), None);
    cache.hset(hash, "f", "v").await.expect("HSET failed");
    assert_eq!(
        cache.hget(hash, "f").await.expect("HGET failed"),
        Some("v".to_string())
    );

    let reply = cache
        .setex(otp, Duration::from_secs(60), "1234")
        .await
        .expect("SETEX failed");
    assert_eq!(reply, "OK");
    let remaining = cache
        .ttl(otp)
        .await
        .expect("TTL failed")
        .expect("Key should expire");
    assert!(remaining <= Duration::from_secs(60));

    let mut keys = cache.keys("kvb:test:raw:*").await.expect("KEYS failed");
    keys.sort();
    assert_eq!(keys.len(), 4);

    assert!(matches!(
        cache.hget(counter, "f").await,
        Err(Error::CommandFailed(_))
    ));
    assert!(matches!(
        cache.ttl("kvb:test:raw:missing").await,
        Err(Error::NotFound(_))
    ));

    for key in [counter, board, hash, otp] {
        cache.client().delete(key).await.expect("Cleanup failed");
    }
}

#[tokio::test]
async fn test_redis_pubsub_roundtrip() {
    let Some(cache) = scoped_service("pubsub").await else {
        return;
    };
    let channel = "kvb:test:pubsub:events";
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    cache
        .subscribe(channel, move |payload| {
            let _ = tx.send(payload);
        })
        .await
        .expect("SUBSCRIBE failed");

    let receivers = cache.publish(channel, "hello").await.expect("PUBLISH failed");
    assert!(receivers >= 1);

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for message");
    assert_eq!(payload.as_deref(), Some("hello"));

    assert_eq!(cache.unsubscribe(channel).await.expect("UNSUBSCRIBE failed"), 1);
    cache.shutdown().await;
}
