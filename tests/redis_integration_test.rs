//! Redis Backend Integration Tests
//!
//! These tests require a running Redis instance.
//!
//! ## Quick Start
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7
//! cargo test --features redis --test redis_integration_test
//! ```
//!
//! ## Environment Variables
//!
//! - `TEST_REDIS_HOST`: Redis host (default: "localhost")
//! - `TEST_REDIS_PORT`: Redis port (default: 6379)
//! - `TEST_REDIS_PASSWORD`: shared secret, if the server requires AUTH
//!
//! ## What's Tested
//!
//! 1. Lazy connect and health check
//! 2. Basic set/get and TTL expiration
//! 3. Batch operations (mget/mset/mdelete) in one round-trip
//! 4. Hash and list sub-operations
//! 5. Batched read-through find against Redis

#![cfg(feature = "redis")]

use cache_table::backend::{CacheBackend, RedisBackend, RedisConnector};
use cache_table::config::{ConfigSource, ConnectionPolicy, Endpoint, StaticConfig, StoreKind};
use cache_table::repository::InMemoryRepository;
use cache_table::{CacheExpander, CacheStrategy, Record, RecordStructure, Value};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Helper: Redis endpoint from environment or defaults
fn redis_endpoint() -> Endpoint {
    let host = env::var("TEST_REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("TEST_REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    let endpoint = Endpoint::new(host).with_port(port);
    match env::var("TEST_REDIS_PASSWORD") {
        Ok(secret) => endpoint.with_credentials(None, &secret),
        Err(_) => endpoint,
    }
}

/// Helper: Create a test Redis backend that gives up quickly
fn create_test_backend() -> RedisBackend {
    let config: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new().with_server(
        StoreKind::KeyValue,
        "default",
        redis_endpoint(),
    ));
    let policy = ConnectionPolicy::default()
        .with_max_attempts(1)
        .with_connect_timeout(Duration::from_secs(2));
    RedisConnector::backend(config, policy)
}

/// Helper: Check if Redis is available
async fn is_redis_available() -> bool {
    create_test_backend().health_check().await.unwrap_or(false)
}

fn users(family: &str) -> Arc<RecordStructure> {
    Arc::new(
        RecordStructure::builder("users")
            .field("id", "uint".parse().expect("Known type"))
            .field("email", "string".parse().expect("Known type"))
            .primary("id", true)
            .cache_family(family)
            .build()
            .expect("Failed to build structure"),
    )
}

// =============================================================================
// Test 1: Redis Connection
// =============================================================================

#[tokio::test]
async fn test_redis_connection() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let backend = create_test_backend();
    assert!(backend
        .health_check()
        .await
        .expect("Health check should not error"));
    println!("✓ Redis connection successful");
}

// =============================================================================
// Test 2: Basic Set/Get and TTL
// =============================================================================

#[tokio::test]
async fn test_redis_basic_set_get() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let backend = create_test_backend();
    let key = "test:integration:key1";

    backend
        .set(key, b"Hello from cache-table!".to_vec(), None)
        .await
        .expect("Failed to set");
    let value = backend.get(key).await.expect("Failed to get");
    assert_eq!(value, Some(b"Hello from cache-table!".to_vec()));

    backend.delete(key).await.expect("Failed to delete");
    assert!(!backend.exists(key).await.expect("Failed to check"));
    println!("✓ Set/Get/Delete successful");
}

#[tokio::test]
async fn test_redis_ttl_expiration() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let backend = create_test_backend();
    let key = "test:integration:ttl";

    backend
        .set(key, b"short-lived".to_vec(), Some(Duration::from_secs(1)))
        .await
        .expect("Failed to set");
    assert!(backend.exists(key).await.expect("Failed to check"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(backend.get(key).await.expect("Failed to get").is_none());
    println!("✓ TTL expiration works");
}

// =============================================================================
// Test 3: Batch Operations
// =============================================================================

#[tokio::test]
async fn test_redis_batch_operations() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let backend = create_test_backend();
    let items: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| (format!("test:batch:{}", i), format!("value_{}", i).into_bytes()))
        .collect();

    backend.mset(&items, None).await.expect("Failed to mset");

    let mut keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
    keys.insert(3, "test:batch:missing");
    let values = backend.mget(&keys).await.expect("Failed to mget");

    assert_eq!(values.len(), 11);
    assert_eq!(values[0], Some(b"value_0".to_vec()));
    assert!(values[3].is_none());
    assert_eq!(values[10], Some(b"value_9".to_vec()));

    backend.mdelete(&keys).await.expect("Failed to mdelete");
    let values = backend.mget(&keys).await.expect("Failed to mget");
    assert!(values.iter().all(Option::is_none));
    println!("✓ Batch operations successful");
}

// =============================================================================
// Test 4: Hashes and Lists
// =============================================================================

#[tokio::test]
async fn test_redis_hash_and_list() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let backend = create_test_backend();
    let hash = "test:integration:hash";
    let list = "test:integration:list";
    backend
        .mdelete(&[hash, list])
        .await
        .expect("Failed to reset keys");

    backend
        .hash_set(hash, "name", b"alice".to_vec())
        .await
        .expect("Failed to hset");
    assert_eq!(
        backend.hash_increment(hash, "visits", 3).await.expect("Failed to hincrby"),
        3
    );
    let all = backend.hash_get_all(hash).await.expect("Failed to hgetall");
    assert_eq!(all.get("name"), Some(&b"alice".to_vec()));

    backend.list_push(list, b"b".to_vec()).await.expect("Failed to rpush");
    backend.list_unshift(list, b"a".to_vec()).await.expect("Failed to lpush");
    assert_eq!(backend.list_len(list).await.expect("Failed to llen"), 2);
    assert_eq!(
        backend.list_range(list, 0, -1).await.expect("Failed to lrange"),
        vec![b"a".to_vec(), b"b".to_vec()]
    );

    backend.mdelete(&[hash, list]).await.expect("Failed to clean up");
    println!("✓ Hash and list operations successful");
}

// =============================================================================
// Test 5: Read-through against Redis
// =============================================================================

#[tokio::test]
async fn test_redis_read_through() {
    if !is_redis_available().await {
        println!("⚠️  Redis not available, skipping test");
        return;
    }

    let structure = users("test_users_rt");
    let repo = InMemoryRepository::new(Arc::clone(&structure));
    for id in 1..=3u64 {
        repo.put([
            ("id", Value::UInt(id)),
            ("email", Value::from(format!("user{}@x.com", id))),
        ])
        .expect("Failed to seed");
    }
    let expander = CacheExpander::new(create_test_backend());
    let ids: Vec<Value> = (1..=4u64).map(Value::UInt).collect();

    // start clean
    expander
        .find::<Record, _>(&repo, &ids, CacheStrategy::Invalidate)
        .await
        .expect("Failed to invalidate");
    let after_invalidate = repo.fetch_count();

    let found = expander
        .find::<Record, _>(&repo, &ids, CacheStrategy::Refresh)
        .await
        .expect("Failed to find");

    assert_eq!(found.found_count(), 3);
    assert!(found.get(3).is_none());
    // 1..=3 came from Redis, only 4 went to the repository
    assert_eq!(repo.fetch_count(), after_invalidate + 1);
    println!("✓ Read-through against Redis successful");
}
