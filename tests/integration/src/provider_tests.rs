//! Built-in executors driven through the dispatcher against mock upstreams

use gateway_core::{Channel, ChannelType, RelayMode, RelayRequest, RelayResponse};
use gateway_providers::{join_url, ExecutorConfig, ExecutorRegistry};
use gateway_server::{AppState, DispatchError};
use gateway_store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::*;

async fn state_with(channels: Vec<Channel>) -> AppState {
    init_tracing();
    let store = Arc::new(MemoryStore::with_records(
        channels,
        vec![test_token()],
        vec![test_group()],
    ));
    let state = AppState::builder(test_config())
        .store(store)
        .rng_seed(5)
        .build()
        .expect("state should build");
    state.registry.refresh().await.expect("registry should load");
    state
}

async fn dispatch(state: &AppState, request: RelayRequest) -> Result<RelayResponse, DispatchError> {
    state
        .dispatcher
        .dispatch(Some(&bearer(TEST_TOKEN_KEY)), None, request)
        .await
}

#[test]
fn test_default_registry_covers_builtin_types() {
    let registry =
        ExecutorRegistry::with_defaults(&ExecutorConfig::default()).expect("client should build");
    assert_eq!(
        registry.registered_types(),
        vec![ChannelType::OpenAi, ChannelType::Azure, ChannelType::Custom]
    );
    // Types without a dedicated executor use the OpenAI-compatible fallback.
    assert!(registry.get(ChannelType::Gemini).is_some());
}

#[test]
fn test_join_url_handles_versioned_bases() {
    assert_eq!(
        join_url("http://upstream.local/v1/", "/v1/chat/completions"),
        "http://upstream.local/v1/chat/completions"
    );
    assert_eq!(
        join_url("http://upstream.local", "/v1/embeddings"),
        "http://upstream.local/v1/embeddings"
    );
}

#[tokio::test]
async fn test_mapped_model_is_sent_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-upstream-1"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini-2024-07-18"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("gpt-4o-mini-2024-07-18")),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let channel = upstream_channel(1, 1, &upstream.uri())
        .with_mapping(TEST_MODEL, "gpt-4o-mini-2024-07-18");
    let state = state_with(vec![channel]).await;

    let response = dispatch(&state, chat_request(TEST_MODEL))
        .await
        .expect("relay should succeed");
    assert_eq!(response.actual_model, "gpt-4o-mini-2024-07-18");
    assert_eq!(response.usage, sample_usage());
}

#[tokio::test]
async fn test_azure_channel_uses_deployment_url() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-35-turbo/chat/completions"))
        .and(query_param("api-version", "2024-02-15-preview"))
        .and(header("api-key", "sk-azure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gpt-35-turbo")))
        .expect(1)
        .mount(&upstream)
        .await;

    let channel = Channel::new(3, "azure", "sk-azure")
        .with_type(ChannelType::Azure)
        .with_base_url(upstream.uri())
        .with_models(["gpt-3.5-turbo"]);
    let state = state_with(vec![channel]).await;

    let response = dispatch(&state, chat_request("gpt-3.5-turbo"))
        .await
        .expect("azure relay should succeed");
    assert_eq!(response.channel_id, 3);
}

#[tokio::test]
async fn test_unreachable_channel_fails_over() {
    let upstream = MockServer::start().await;
    mount_chat_success(&upstream, TEST_MODEL).await;

    let state = state_with(vec![
        upstream_channel(1, 10, "http://127.0.0.1:1"),
        upstream_channel(2, 0, &upstream.uri()),
    ])
    .await;

    let response = dispatch(&state, chat_request(TEST_MODEL))
        .await
        .expect("second channel serves the request");
    assert_eq!(response.channel_id, 2);
    assert_eq!(state.monitor.request_counts(TEST_MODEL, 1), (1, 1));
}

#[tokio::test]
async fn test_upstream_error_code_is_preserved() {
    let upstream = MockServer::start().await;
    mount_upstream_error(&upstream, 400, "context length exceeded", "context_length_exceeded")
        .await;
    let state = state_with(vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let err = dispatch(&state, chat_request(TEST_MODEL))
        .await
        .expect_err("400 is terminal");
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.error.error_code(), "context_length_exceeded");
    assert!(err.message().contains("context length exceeded"));
}

#[tokio::test]
async fn test_embeddings_mode_hits_embeddings_path() {
    let upstream = MockServer::start().await;
    mount_embeddings_success(&upstream, TEST_MODEL).await;
    let state = state_with(vec![upstream_channel(1, 1, &upstream.uri())]).await;

    let request = RelayRequest::from_payload(RelayMode::Embeddings, embeddings_payload(TEST_MODEL))
        .expect("valid payload");
    let response = dispatch(&state, request)
        .await
        .expect("embeddings relay should succeed");
    assert_eq!(response.usage.prompt_tokens, 5);
}
