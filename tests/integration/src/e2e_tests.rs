//! End-to-end relay scenarios through the dispatcher

use gateway_core::{GatewayError, UPSTREAM_SATURATED_MESSAGE};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::time::Duration;

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::ScriptedExecutor;

/// Single unlimited token, one channel: success with no retry
#[tokio::test]
async fn test_scenario_single_channel_success() {
    let harness = Harness::new(test_config(), vec![test_channel(1, 1)], ScriptedExecutor::new()).await;

    let response = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("request should succeed");

    assert_eq!(response.status, 200);
    assert_eq!(response.channel_id, 1);
    assert_eq!(harness.executor.calls(), vec![1]);
    assert_eq!(harness.state.monitor.request_counts(TEST_MODEL, 1), (1, 0));

    let token = harness.store.token(TEST_TOKEN_KEY).expect("token exists");
    assert!(token.used_amount > 0.0);
}

/// A failing high-priority channel fails over to the zero-priority one
#[tokio::test]
async fn test_scenario_failover_on_server_error() {
    let executor = ScriptedExecutor::new().always(10, 500);
    let harness = Harness::new(
        test_config(),
        vec![test_channel(10, 10), test_channel(20, 0)],
        executor,
    )
    .await;

    let response = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("request should fail over");

    assert_eq!(response.channel_id, 20);
    assert_eq!(harness.executor.calls(), vec![10, 20]);
    let monitor = &harness.state.monitor;
    assert_eq!(monitor.request_counts(TEST_MODEL, 10), (1, 1));
    assert_eq!(monitor.request_counts(TEST_MODEL, 20), (1, 0));
    assert!(!monitor.is_banned(TEST_MODEL, 10));
}

/// Global admission rejects the second request before any selection
#[tokio::test]
async fn test_scenario_global_rate_limit() {
    let mut config = test_config();
    config.rate_limit.global_qpm = 1;
    let harness = Harness::new(config, vec![test_channel(1, 1)], ScriptedExecutor::new()).await;

    harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("first request is admitted");
    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("second request is rejected");

    assert_eq!(err.status_code(), 429);
    assert!(matches!(err.error, GatewayError::RateLimited { ref scope } if scope == "global"));
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(harness.state.monitor.request_counts(TEST_MODEL, 1), (1, 0));
}

/// Eleven errors in twenty calls ban the pair until the ban elapses
#[tokio::test(start_paused = true)]
async fn test_scenario_auto_ban_and_recovery() {
    let mut config = test_config();
    config.retry.max_retries = 0;
    config.monitor.error_rate_threshold = 0.5;
    config.monitor.min_requests = 20;
    config.monitor.ban_duration = Duration::from_secs(120);

    let statuses = std::iter::repeat(200).take(9).chain(std::iter::repeat(500).take(11));
    let executor = ScriptedExecutor::new().script(1, statuses);
    let harness = Harness::new(config, vec![test_channel(1, 1)], executor).await;

    for i in 0..20 {
        let result = harness.dispatch(chat_request(TEST_MODEL)).await;
        assert_eq!(result.is_ok(), i < 9, "call {i}");
    }

    let monitor = &harness.state.monitor;
    assert!(monitor.is_banned(TEST_MODEL, 1));
    let banned = monitor.banned_channels(TEST_MODEL);
    assert_eq!(banned, HashSet::from([1]));
    assert!(harness
        .state
        .registry
        .select_channel(TEST_MODEL, &HashSet::new(), &banned)
        .is_err());

    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("banned channel is not selected");
    assert_eq!(err.status_code(), 503);
    assert_eq!(harness.executor.call_count(), 20);

    tokio::time::advance(Duration::from_secs(121)).await;

    assert!(monitor.banned_channels(TEST_MODEL).is_empty());
    let response = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("channel is selectable after the ban");
    assert_eq!(response.channel_id, 1);
}

#[tokio::test]
async fn test_permission_failure_bans_at_once() {
    let executor = ScriptedExecutor::new().always(1, 401);
    let harness = Harness::new(
        test_config(),
        vec![test_channel(1, 10), test_channel(2, 0)],
        executor,
    )
    .await;

    let response = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("second channel serves the request");

    assert_eq!(response.channel_id, 2);
    assert!(harness.state.monitor.is_banned(TEST_MODEL, 1));
}

#[tokio::test(start_paused = true)]
async fn test_upstream_saturation_is_rewritten() {
    let mut config = test_config();
    config.retry.max_retries = 1;
    let executor = ScriptedExecutor::new().always(1, 429).always(2, 429);
    let harness = Harness::new(
        config,
        vec![test_channel(1, 10), test_channel(2, 0)],
        executor,
    )
    .await;

    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("every channel is saturated");

    assert_eq!(err.status_code(), 429);
    assert!(err.message().starts_with(UPSTREAM_SATURATED_MESSAGE));
    assert_eq!(harness.executor.calls(), vec![1, 2]);
}

#[tokio::test]
async fn test_client_error_is_terminal() {
    let executor = ScriptedExecutor::new().always(1, 400);
    let harness = Harness::new(
        test_config(),
        vec![test_channel(1, 10), test_channel(2, 0)],
        executor,
    )
    .await;

    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("400 is surfaced");

    assert_eq!(err.status_code(), 400);
    assert_eq!(harness.executor.calls(), vec![1]);
    assert_eq!(harness.state.monitor.request_counts(TEST_MODEL, 1), (0, 0));
}

#[tokio::test]
async fn test_internal_group_is_not_billed() {
    let mut token = test_token();
    token.group_id = "ops".to_string();
    let harness = Harness::with_records(
        test_config(),
        vec![test_channel(1, 1)],
        vec![token],
        vec![internal_group("ops")],
        ScriptedExecutor::new(),
    )
    .await;

    harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect("internal request succeeds");

    let token = harness.store.token(TEST_TOKEN_KEY).expect("token exists");
    assert!(token.used_amount.abs() < f64::EPSILON);
    let group = harness.store.group("ops").expect("group exists");
    assert!(group.used_amount.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_model_outside_allowlist_is_forbidden() {
    let mut token = test_token();
    token.models = vec!["gpt-4o".to_string()];
    let harness = Harness::with_records(
        test_config(),
        vec![test_channel(1, 1)],
        vec![token],
        vec![test_group()],
        ScriptedExecutor::new(),
    )
    .await;

    let err = harness
        .dispatch(chat_request(TEST_MODEL))
        .await
        .expect_err("model is not allowed");

    assert_eq!(err.status_code(), 403);
    assert_eq!(harness.executor.call_count(), 0);
}
