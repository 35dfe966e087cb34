//! HTTP API tests over a real listener and mock upstreams

use gateway_config::{GatewayConfig, ModelPrice};
use gateway_core::Channel;
use gateway_server::{create_router, AppState};
use gateway_store::MemoryStore;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use wiremock::MockServer;

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::*;

const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Gateway with the built-in executors over `channels`
async fn serve(config: GatewayConfig, channels: Vec<Channel>) -> (TestServer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_records(
        channels,
        vec![test_token()],
        vec![test_group()],
    ));
    let state = AppState::builder(config)
        .store(store.clone())
        .rng_seed(11)
        .build()
        .expect("state should build");
    state.registry.refresh().await.expect("registry should load");
    (TestServer::new(create_router(state)).await, store)
}

fn billed_config(billing_url: &str) -> GatewayConfig {
    let mut config = test_config();
    config.billing.enabled = true;
    config.billing.base_url = Some(billing_url.to_string());
    config.billing.fail_open = false;
    config.billing.default_price = ModelPrice {
        input_per_1k: 1.0,
        output_per_1k: 2.0,
    };
    config
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = serve(test_config(), vec![test_channel(1, 1)]).await;

    let response = server.get("/health", None).await;
    assert_eq!(response.status(), 200);

    let body = TestServer::json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["channels"], 1);
    assert_eq!(body["cache_backend"], "none");
}

#[tokio::test]
async fn test_chat_completion_through_mock_upstream() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let (server, store) = serve(test_config(), vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let body = TestServer::json_body(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["usage"]["total_tokens"], 30);

    let received = upstream.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0]
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer sk-upstream-1")
    );
    let token = store.token(TEST_TOKEN_KEY).expect("token exists");
    assert!(token.used_amount > 0.0);
}

#[tokio::test]
async fn test_embeddings_through_mock_upstream() {
    let upstream = MockServer::start().await;
    mount_embeddings_success(&upstream, EMBEDDING_MODEL).await;
    let channel = Channel::new(5, "embeddings", "sk-embed")
        .with_models([EMBEDDING_MODEL])
        .with_base_url(upstream.uri());
    let (server, _) = serve(test_config(), vec![channel]).await;

    let response = server
        .post_json("/v1/embeddings", TEST_TOKEN_KEY, &embeddings_payload(EMBEDDING_MODEL))
        .await;
    assert_eq!(response.status(), 200);

    let body = TestServer::json_body(response).await;
    assert_eq!(body["data"][0]["embedding"], json!([0.1, 0.2, 0.3]));
}

#[tokio::test]
async fn test_upstream_error_envelope_reaches_caller() {
    let upstream = MockServer::start().await;
    mount_upstream_error(&upstream, 400, "messages is required", "missing_field").await;
    let (server, _) = serve(test_config(), vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 400);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("error responses carry the request id");

    let body = TestServer::json_body(response).await;
    assert_eq!(body["error"]["type"], "relay_error");
    assert_eq!(body["error"]["code"], "missing_field");
    let message = body["error"]["message"].as_str().expect("message is a string");
    assert!(message.contains("messages is required"));
    assert!(message.contains(&request_id));
    assert_eq!(upstream.received_requests().await.unwrap_or_default().len(), 1);
}

#[tokio::test]
async fn test_unauthenticated_request_is_rejected() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let (server, _) = serve(test_config(), vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let response = server
        .post_json("/v1/chat/completions", "not-a-key", &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 401);
    let body = TestServer::json_body(response).await;
    assert_eq!(body["error"]["type"], "relay_error");
    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_models_listing() {
    let embed = Channel::new(5, "embeddings", "sk-embed").with_models([EMBEDDING_MODEL]);
    let (server, _) = serve(test_config(), vec![test_channel(1, 1), embed]).await;

    let response = server.get("/v1/models", Some(TEST_TOKEN_KEY)).await;
    assert_eq!(response.status(), 200);

    let body = TestServer::json_body(response).await;
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("data is an array")
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec![TEST_MODEL, EMBEDDING_MODEL]);
}

#[tokio::test]
async fn test_metrics_count_relayed_requests() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let (server, _) = serve(test_config(), vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 200);

    let response = server.get("/metrics", None).await;
    assert_eq!(response.status(), 200);
    let text = response.text().await.expect("metrics body");
    assert!(text.contains("relay_requests_total{model=\"gpt-4o-mini\",status=\"200\"} 1"));
    assert!(text.contains("relay_upstream_duration_seconds_count"));
}

#[tokio::test]
async fn test_empty_balance_is_payment_required() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let billing = MockServer::start().await;
    mount_balance(&billing, TEST_GROUP, 0.0).await;
    mount_consume(&billing).await;

    let (server, _) = serve(
        billed_config(&billing.uri()),
        vec![upstream_channel(1, 1, &upstream.uri())],
    )
    .await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 402);
    let body = TestServer::json_body(response).await;
    assert_eq!(body["error"]["code"], "insufficient_balance");

    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
    assert!(consumed_bodies(&billing).await.is_empty());
}

#[tokio::test]
async fn test_successful_call_is_debited() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let billing = MockServer::start().await;
    mount_balance(&billing, TEST_GROUP, 100.0).await;
    mount_consume(&billing).await;

    let (server, _) = serve(
        billed_config(&billing.uri()),
        vec![upstream_channel(1, 1, &upstream.uri())],
    )
    .await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 200);

    let consumed = consumed_bodies(&billing).await;
    assert_eq!(consumed.len(), 1);
    let debit = &consumed[0];
    assert_eq!(debit["group"], TEST_GROUP);
    assert_eq!(debit["identity"], format!("{TEST_GROUP}-identity"));
    assert_eq!(debit["app_name"], "llm-relay-gateway");
    // 20 prompt tokens at 1.0/1k plus 10 completion tokens at 2.0/1k
    let amount = debit["amount"].as_f64().expect("amount is a number");
    assert!((0.04..0.0402).contains(&amount), "got {amount}");
}

#[tokio::test]
async fn test_unreachable_billing_fails_closed() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;
    let (server, _) = serve(
        billed_config("http://127.0.0.1:1"),
        vec![upstream_channel(1, 1, &upstream.uri())],
    )
    .await;

    let response = server
        .post_json("/v1/chat/completions", TEST_TOKEN_KEY, &chat_payload(TEST_MODEL))
        .await;
    assert_eq!(response.status(), 503);
    let body = TestServer::json_body(response).await;
    assert_eq!(body["error"]["code"], "billing_unavailable");
}
