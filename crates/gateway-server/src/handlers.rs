//! HTTP request handlers for the gateway API.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{RelayMode, RelayRequest, RequestId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::ApiError,
    extractors::{ClientIp, JsonBody, RawCredential, RequestIdHeader},
    state::AppState,
};

/// Owner reported for every listed model
const MODEL_OWNER: &str = "llm-relay-gateway";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,
    /// Gateway version
    pub version: &'static str,
    /// Channels in the current registry snapshot
    pub channels: usize,
    /// Active cache backend
    pub cache_backend: &'static str,
    /// Whether the cache backend answered
    pub cache_healthy: bool,
}

/// One entry of `GET /v1/models`
#[derive(Debug, Serialize)]
pub struct ModelObject {
    /// Model name
    pub id: String,
    /// Always `model`
    pub object: &'static str,
    /// Owner label
    pub owned_by: &'static str,
}

/// `GET /v1/models` body
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    /// Always `list`
    pub object: &'static str,
    /// Visible models, sorted
    pub data: Vec<ModelObject>,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Response {
    let backend = state.cache.backend();
    let cache_healthy = match backend.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "Cache health check failed");
            false
        }
    };

    let body = HealthResponse {
        status: if cache_healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        channels: state.registry.snapshot().len(),
        cache_backend: backend.name(),
        cache_healthy,
    };
    let status = if cache_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Metrics endpoint (Prometheus text format)
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(metrics) = &state.metrics else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "metrics are disabled",
            "not_found",
        ));
    };
    let body = metrics.render().map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to render metrics: {e}"),
            "internal_error",
        )
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// List the models the caller may use (OpenAI compatible)
pub async fn list_models(
    State(state): State<AppState>,
    RequestIdHeader(request_id): RequestIdHeader,
    RawCredential(credential): RawCredential,
    ClientIp(client_ip): ClientIp,
) -> Result<Json<ModelsResponse>, ApiError> {
    let ctx = state
        .dispatcher
        .authenticator()
        .authenticate(credential.as_deref(), client_ip)
        .await
        .map_err(|e| ApiError::from_gateway(&e, &request_id))?;

    let data = state
        .registry
        .models()
        .into_iter()
        .filter(|model| ctx.allows_model(model))
        .map(|id| ModelObject {
            id,
            object: "model",
            owned_by: MODEL_OWNER,
        })
        .collect();

    Ok(Json(ModelsResponse {
        object: "list",
        data,
    }))
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    RequestIdHeader(request_id): RequestIdHeader,
    RawCredential(credential): RawCredential,
    ClientIp(client_ip): ClientIp,
    JsonBody(payload): JsonBody<Value>,
) -> Result<Response, ApiError> {
    relay(
        &state,
        RelayMode::ChatCompletions,
        request_id,
        credential,
        client_ip,
        payload,
    )
    .await
}

/// `POST /v1/completions`
pub async fn completions(
    State(state): State<AppState>,
    RequestIdHeader(request_id): RequestIdHeader,
    RawCredential(credential): RawCredential,
    ClientIp(client_ip): ClientIp,
    JsonBody(payload): JsonBody<Value>,
) -> Result<Response, ApiError> {
    relay(
        &state,
        RelayMode::Completions,
        request_id,
        credential,
        client_ip,
        payload,
    )
    .await
}

/// `POST /v1/embeddings`
pub async fn embeddings(
    State(state): State<AppState>,
    RequestIdHeader(request_id): RequestIdHeader,
    RawCredential(credential): RawCredential,
    ClientIp(client_ip): ClientIp,
    JsonBody(payload): JsonBody<Value>,
) -> Result<Response, ApiError> {
    relay(
        &state,
        RelayMode::Embeddings,
        request_id,
        credential,
        client_ip,
        payload,
    )
    .await
}

async fn relay(
    state: &AppState,
    mode: RelayMode,
    request_id: RequestId,
    credential: Option<String>,
    client_ip: Option<std::net::IpAddr>,
    payload: Value,
) -> Result<Response, ApiError> {
    let request = RelayRequest::from_payload(mode, payload)
        .map_err(|e| ApiError::from_gateway(&e, &request_id))?
        .with_id(request_id.clone())
        .with_client_ip(client_ip);

    debug!(
        request_id = %request_id.as_str(),
        mode = ?mode,
        model = %request.model,
        "Relaying request"
    );

    let relayed = state
        .dispatcher
        .dispatch(credential.as_deref(), client_ip, request)
        .await?;

    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Json(relayed.body)).into_response();
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert("x-request-id", value);
    }
    Ok(response)
}
