//! Relay request and response types.
//!
//! The gateway does not translate provider wire formats: the payload is kept
//! as raw JSON and only the fields the dispatcher needs are lifted out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

/// Correlation identifier attached to every request and error message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing identifier, e.g. one forwarded by a load balancer
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append the correlation identifier to a user-visible message
#[must_use]
pub fn message_with_request_id(message: &str, id: &RequestId) -> String {
    format!("{message} (request id: {id})")
}

/// Relay endpoint targeted by the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// `/v1/chat/completions`
    ChatCompletions,
    /// `/v1/completions`
    Completions,
    /// `/v1/embeddings`
    Embeddings,
}

impl RelayMode {
    /// Upstream path for this mode
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::ChatCompletions => "/v1/chat/completions",
            Self::Completions => "/v1/completions",
            Self::Embeddings => "/v1/embeddings",
        }
    }
}

/// An inbound request ready for dispatch
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Correlation identifier
    pub id: RequestId,
    /// Endpoint kind
    pub mode: RelayMode,
    /// Requested model, as sent by the caller
    pub model: String,
    /// Original JSON payload
    pub payload: Value,
    /// Caller address, when known
    pub client_ip: Option<IpAddr>,
}

impl RelayRequest {
    /// Build a request from a raw JSON payload.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidRequest`] when the payload is not an
    /// object or carries no `model` string.
    pub fn from_payload(mode: RelayMode, payload: Value) -> GatewayResult<Self> {
        let model = payload
            .as_object()
            .ok_or_else(|| GatewayError::invalid_request("request body must be a JSON object"))?
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GatewayError::invalid_request("model is required"))?
            .to_string();

        if payload.get("stream").and_then(Value::as_bool) == Some(true) {
            return Err(GatewayError::invalid_request(
                "streaming responses are not supported by this gateway",
            ));
        }

        Ok(Self {
            id: RequestId::generate(),
            mode,
            model,
            payload,
            client_ip: None,
        })
    }

    /// Set the correlation identifier
    #[must_use]
    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    /// Set the caller address
    #[must_use]
    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }

    /// Payload with `model` replaced by the upstream model name
    #[must_use]
    pub fn payload_for_model(&self, upstream_model: &str) -> Value {
        let mut payload = self.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("model".to_string(), Value::String(upstream_model.to_string()));
        }
        payload
    }
}

/// Token accounting reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Create usage, deriving the total
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Whether any tokens were consumed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// Successful upstream response
#[derive(Debug, Clone)]
pub struct RelayResponse {
    /// Upstream status (2xx)
    pub status: u16,
    /// Response body, forwarded unchanged
    pub body: Value,
    /// Token usage
    pub usage: Usage,
    /// Model the upstream actually used
    pub actual_model: String,
    /// Channel that served the request
    pub channel_id: i64,
}
