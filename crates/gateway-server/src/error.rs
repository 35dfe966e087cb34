//! API error responses and server startup errors.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{message_with_request_id, GatewayError, RequestId};
use serde::Serialize;
use thiserror::Error;

use crate::dispatcher::DispatchError;

/// Error returned to HTTP callers.
///
/// Serialized as `{"error": {"message", "type": "relay_error", "code"}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// User-visible message, already carrying the request id when known
    pub message: String,
    /// Stable machine-readable code
    pub code: String,
    /// Correlation identifier echoed in `x-request-id`
    pub request_id: Option<RequestId>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'a str,
}

impl ApiError {
    /// Create an error
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            request_id: None,
        }
    }

    /// 400 for malformed requests
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "invalid_request")
    }

    /// Map a gateway error, tagging the message with `request_id`
    #[must_use]
    pub fn from_gateway(err: &GatewayError, request_id: &RequestId) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            message: message_with_request_id(&err.to_string(), request_id),
            code: err.error_code(),
            request_id: Some(request_id.clone()),
        }
    }

    /// Attach a request id, appending it to the message
    #[must_use]
    pub fn with_request_id(mut self, request_id: &RequestId) -> Self {
        if self.request_id.is_none() {
            self.message = message_with_request_id(&self.message, request_id);
            self.request_id = Some(request_id.clone());
        }
        self
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self::from_gateway(&err.error, &err.request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                message: &self.message,
                kind: "relay_error",
                code: &self.code,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(id) = &self.request_id {
            if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                response.headers_mut().insert("x-request-id", value);
            }
        }
        response
    }
}

/// Failure while assembling or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] gateway_config::ConfigError),

    /// System-of-record connection failure
    #[error(transparent)]
    Store(#[from] gateway_store::StoreError),

    /// Cache backend connection failure
    #[error(transparent)]
    Cache(#[from] gateway_resilience::CacheError),

    /// Billing client construction failure
    #[error(transparent)]
    Billing(#[from] gateway_billing::BillingError),

    /// Metrics registration failure
    #[error(transparent)]
    Metrics(#[from] gateway_telemetry::MetricsError),

    /// Runtime gateway failure, e.g. the startup registry load
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Executor HTTP client construction failure
    #[error("executor setup failed: {0}")]
    Executor(String),

    /// Listener failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for server setup
pub type ServerResult<T> = Result<T, ServerError>;
