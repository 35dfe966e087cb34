//! Cache store behavior across backends

use gateway_core::{SystemOfRecord, Token, TokenStatus};
use gateway_resilience::{
    jittered_ttl, CacheBackend, CacheKind, CacheStore, CacheStoreConfig, MemoryCacheBackend,
    NoopCacheBackend, RedisCacheBackend, USED_AMOUNT_FIELD,
};
use gateway_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::*;

fn cache_over(backend: Arc<dyn CacheBackend>) -> (CacheStore, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_records(
        Vec::new(),
        vec![test_token()],
        vec![test_group()],
    ));
    let config = CacheStoreConfig {
        ttl: Duration::from_secs(60),
        ttl_jitter: 0.0,
    };
    (CacheStore::new(backend, store.clone(), config), store)
}

fn assert_same_billing_fields(cached: &Token, stored: &Token) {
    assert_eq!(cached.id, stored.id);
    assert_eq!(cached.group_id, stored.group_id);
    assert_eq!(cached.status, stored.status);
    assert!((cached.quota - stored.quota).abs() < f64::EPSILON);
    assert!((cached.used_amount - stored.used_amount).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_token_round_trip_with_memory_backend() {
    let (cache, store) = cache_over(Arc::new(MemoryCacheBackend::new()));

    let first = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    let second = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");

    assert_same_billing_fields(&second, &first);
    assert_eq!(store.read_count(), 1, "second read is served from the cache");
}

#[tokio::test]
async fn test_token_round_trip_with_noop_backend() {
    let (cache, store) = cache_over(Arc::new(NoopCacheBackend));

    let mut token = test_token();
    token.used_amount = 1.5;
    cache
        .set(CacheKind::Token, TEST_TOKEN_KEY, &token, Duration::from_secs(60))
        .await;

    let read = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    let stored = store.token(TEST_TOKEN_KEY).expect("token exists");
    assert_same_billing_fields(&read, &stored);
    assert_eq!(store.read_count(), 1);

    cache.token(TEST_TOKEN_KEY).await.expect("store is healthy");
    assert_eq!(store.read_count(), 2, "noop backend always misses");
}

#[tokio::test]
async fn test_missing_records_are_not_cached() {
    let (cache, store) = cache_over(Arc::new(MemoryCacheBackend::new()));

    for _ in 0..2 {
        assert!(cache.token("missing").await.expect("store is healthy").is_none());
    }
    assert_eq!(store.read_count(), 2);
    assert!(cache.group("missing").await.expect("store is healthy").is_none());
}

#[tokio::test]
async fn test_record_usage_updates_store_and_cache() {
    let (cache, store) = cache_over(Arc::new(MemoryCacheBackend::new()));
    let token = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    cache.group(TEST_GROUP).await.expect("store is healthy");

    cache.record_usage(&token, 0.25).await.expect("store is healthy");
    cache.record_usage(&token, 0.5).await.expect("store is healthy");

    let stored = store.token(TEST_TOKEN_KEY).expect("token exists");
    assert!((stored.used_amount - 0.75).abs() < 1e-9);
    let group = store.group(TEST_GROUP).expect("group exists");
    assert!((group.used_amount - 0.75).abs() < 1e-9);

    let cached = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    assert!((cached.used_amount - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_adjust_leaves_absent_keys_absent() {
    let (cache, _) = cache_over(Arc::new(MemoryCacheBackend::new()));
    let adjusted = cache
        .atomic_adjust(CacheKind::Group, "never-cached", USED_AMOUNT_FIELD, 1.0)
        .await;
    assert!(adjusted.is_none());
}

#[tokio::test]
async fn test_status_change_invalidates_cached_token() {
    let (cache, store) = cache_over(Arc::new(MemoryCacheBackend::new()));
    let token = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");

    cache
        .set_token_status(&token, TokenStatus::Exhausted)
        .await
        .expect("store is healthy");

    let reloaded = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    assert_eq!(reloaded.status, TokenStatus::Exhausted);
    assert_eq!(store.read_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cached_entries_expire() {
    let (cache, store) = cache_over(Arc::new(MemoryCacheBackend::new()));
    cache.token(TEST_TOKEN_KEY).await.expect("store is healthy");

    tokio::time::advance(Duration::from_secs(61)).await;
    cache.token(TEST_TOKEN_KEY).await.expect("store is healthy");
    assert_eq!(store.read_count(), 2);
}

#[test]
fn test_jittered_ttl_bounds() {
    let base = Duration::from_secs(100);
    for _ in 0..200 {
        let ttl = jittered_ttl(base, 0.2);
        assert!(ttl >= Duration::from_secs(80) && ttl <= Duration::from_secs(120));
    }
    assert_eq!(jittered_ttl(base, 0.0), base);
    assert_eq!(jittered_ttl(base, f64::NAN), base);
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn test_redis_backend_round_trip() {
    let Ok(url) = std::env::var("REDIS_URL") else {
        return;
    };
    let backend = RedisCacheBackend::connect(&url, "relay-test", Duration::from_millis(500))
        .await
        .expect("redis should be reachable");
    backend.health_check().await.expect("redis answers PING");
    assert!(backend.is_distributed());

    let (cache, store) = cache_over(Arc::new(backend));
    let token = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    cache.record_usage(&token, 0.5).await.expect("store is healthy");

    let cached = cache
        .token(TEST_TOKEN_KEY)
        .await
        .expect("store is healthy")
        .expect("token exists");
    assert!((cached.used_amount - 0.5).abs() < 1e-9);
    assert_eq!(store.read_count(), 1);

    cache.invalidate(CacheKind::Token, TEST_TOKEN_KEY).await;
}

#[tokio::test]
async fn test_memory_store_is_the_system_of_record() {
    let store = MemoryStore::with_records(Vec::new(), vec![test_token()], vec![test_group()]);
    store
        .add_token_used_amount(1, 2.0)
        .await
        .expect("memory store is infallible");
    store
        .update_token_status(1, TokenStatus::Disabled)
        .await
        .expect("memory store is infallible");

    let token = store
        .find_token_by_key(TEST_TOKEN_KEY)
        .await
        .expect("memory store is infallible")
        .expect("token exists");
    assert!((token.used_amount - 2.0).abs() < f64::EPSILON);
    assert_eq!(token.status, TokenStatus::Disabled);
    assert_eq!(store.name(), "memory");
}
