//! Rate limiting and admission control

use gateway_core::{GatewayError, Group};
use gateway_resilience::{
    AdmissionConfig, AdmissionController, CacheBackend, MemoryCacheBackend, NoopCacheBackend,
    RateLimiter,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::ScriptedExecutor;

const WINDOW: Duration = Duration::from_secs(60);

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(Arc::new(NoopCacheBackend)))
}

fn scope_of(err: &GatewayError) -> &str {
    match err {
        GatewayError::RateLimited { scope } => scope,
        other => panic!("expected a rate limit rejection, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_admits_after_oldest_expires() {
    let limiter = limiter();

    for _ in 0..3 {
        assert!(limiter.allow("key", 3, WINDOW).await);
        tokio::time::advance(Duration::from_secs(10)).await;
    }
    assert!(!limiter.allow("key", 3, WINDOW).await);

    // The oldest call was 30s ago; it leaves the window 60s after it was made.
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!limiter.allow("key", 3, WINDOW).await);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(limiter.allow("key", 3, WINDOW).await);
    assert!(!limiter.allow("key", 3, WINDOW).await);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_calls_do_not_consume_budget() {
    let limiter = limiter();
    assert!(limiter.allow("key", 1, WINDOW).await);
    for _ in 0..5 {
        assert!(!limiter.allow("key", 1, WINDOW).await);
    }
    assert_eq!(limiter.count("key", WINDOW).await, 1);

    tokio::time::advance(WINDOW).await;
    assert!(limiter.allow("key", 1, WINDOW).await);
}

#[tokio::test(start_paused = true)]
async fn test_idle_windows_are_evicted() {
    let limiter = limiter();
    limiter.allow("a", 10, WINDOW).await;
    limiter.allow("b", 10, WINDOW).await;

    tokio::time::advance(Duration::from_secs(120)).await;
    limiter.allow("b", 10, WINDOW).await;

    assert_eq!(limiter.evict_idle(Duration::from_secs(100)), 1);
    assert_eq!(limiter.count("b", WINDOW).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_memory_cache_backend_limits_locally() {
    let backend = Arc::new(MemoryCacheBackend::new());
    assert!(backend.windowed_admit("window", 2, WINDOW).await.is_err());

    let limiter = RateLimiter::new(backend);
    assert!(!limiter.is_distributed());
    assert!(limiter.allow("window", 2, WINDOW).await);
    assert!(limiter.allow("window", 2, WINDOW).await);
    assert!(!limiter.allow("window", 2, WINDOW).await);

    tokio::time::advance(WINDOW).await;
    assert_eq!(limiter.count("window", WINDOW).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_admission_tiers_in_order() {
    let config = AdmissionConfig {
        global_qpm: 10,
        group_qpm: 4,
        default_model_rpm: 2,
        model_rpm: HashMap::new(),
        window: WINDOW,
    };
    let admission = AdmissionController::new(limiter(), config);
    let group = Group::new("team");

    admission.admit(&group, "a").await.expect("first call");
    admission.admit(&group, "a").await.expect("second call");
    let err = admission
        .admit(&group, "a")
        .await
        .expect_err("model budget exhausted");
    assert_eq!(scope_of(&err), "model");

    // The rejected call still counted against the global and group tiers.
    admission.admit(&group, "b").await.expect("other model");
    let err = admission
        .admit(&group, "c")
        .await
        .expect_err("group budget exhausted");
    assert_eq!(scope_of(&err), "group");
}

#[tokio::test(start_paused = true)]
async fn test_group_overrides_and_ratio() {
    let config = AdmissionConfig {
        global_qpm: 0,
        group_qpm: 100,
        default_model_rpm: 10,
        model_rpm: HashMap::from([("gpt-4o".to_string(), 4)]),
        window: WINDOW,
    };

    let mut scaled = Group::new("scaled");
    scaled.rpm_ratio = 0.5;
    assert_eq!(config.model_limit(&scaled, "gpt-4o"), 2);
    assert_eq!(config.model_limit(&scaled, "other"), 5);

    let mut pinned = Group::new("pinned");
    pinned.rpm = HashMap::from([("gpt-4o".to_string(), 1)]);
    pinned.qpm = 7;
    assert_eq!(config.model_limit(&pinned, "gpt-4o"), 1);
    assert_eq!(config.group_limit(&pinned), 7);

    let admission = AdmissionController::new(limiter(), config);
    admission.admit(&pinned, "gpt-4o").await.expect("first call");
    assert!(admission.admit(&pinned, "gpt-4o").await.is_err());
}

#[tokio::test]
async fn test_group_qpm_through_dispatcher() {
    let mut config = test_config();
    config.rate_limit.group_qpm = 2;
    let harness = Harness::new(config, vec![test_channel(1, 1)], ScriptedExecutor::new()).await;

    for _ in 0..2 {
        harness
            .dispatch(chat_request(TEST_MODEL))
            .await
            .expect("within budget");
    }
    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("group budget exhausted");

    assert_eq!(scope_of(&err.error), "group");
    assert_eq!(err.error.error_code(), "rate_limit_exceeded");
    assert_eq!(harness.executor.call_count(), 2);
    assert_eq!(harness.state.dispatcher.admission().current_rpm(TEST_MODEL).await, 2);
}

#[tokio::test]
async fn test_internal_group_is_still_limited() {
    let mut config = test_config();
    config.rate_limit.group_qpm = 1;
    let mut token = test_token();
    token.group_id = "ops".to_string();
    let harness = Harness::with_records(
        config,
        vec![test_channel(1, 1)],
        vec![token],
        vec![internal_group("ops")],
        ScriptedExecutor::new(),
    )
    .await;

    harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("within budget");
    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("internal groups are rate limited");
    assert_eq!(err.status_code(), 429);
}
