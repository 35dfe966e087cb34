//! OpenAI-compatible request executor.
//!
//! Forwards the caller's JSON payload unchanged apart from the model name,
//! which is rewritten through the channel's model mapping. Works for any
//! upstream that speaks the OpenAI wire format.

use async_trait::async_trait;
use gateway_core::{
    Channel, ChannelType, RelayRequest, RelayResponse, RequestExecutor, UpstreamError, Usage,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Base URL used when an OpenAI channel does not set one
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// HTTP client settings shared by executors
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Overall request timeout enforced by the HTTP client
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 100,
            user_agent: concat!("llm-relay-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build an HTTP client from these settings
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn build_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .user_agent(self.user_agent.clone())
            .build()
    }
}

/// Executor for OpenAI-compatible upstreams
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleExecutor {
    client: Client,
}

impl OpenAiCompatibleExecutor {
    /// Create an executor with its own HTTP client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ExecutorConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(config.build_client()?))
    }

    /// Create an executor over an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(channel: &Channel, request: &RelayRequest) -> String {
        let base = if channel.base_url.is_empty() {
            DEFAULT_OPENAI_BASE_URL
        } else {
            channel.base_url.as_str()
        };
        join_url(base, request.mode.path())
    }
}

/// Join a base URL and an API path, avoiding a doubled `/v1`
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    match path.strip_prefix("/v1") {
        Some(rest) if base.ends_with("/v1") => format!("{base}{rest}"),
        _ => format!("{base}{path}"),
    }
}

#[async_trait]
impl RequestExecutor for OpenAiCompatibleExecutor {
    fn channel_types(&self) -> &[ChannelType] {
        &[ChannelType::OpenAi, ChannelType::Custom]
    }

    async fn execute(
        &self,
        channel: &Channel,
        request: &RelayRequest,
    ) -> Result<RelayResponse, UpstreamError> {
        let upstream_model = channel.mapped_model(&request.model);
        let url = Self::endpoint(channel, request);

        debug!(
            request_id = %request.id,
            channel = channel.id,
            model = %request.model,
            upstream_model = %upstream_model,
            url = %url,
            "Sending request to upstream"
        );

        let builder = self
            .client
            .post(&url)
            .bearer_auth(channel.secret())
            .json(&request.payload_for_model(upstream_model));

        send(builder, channel, upstream_model).await
    }
}

/// Send a prepared upstream request and classify the outcome
pub(crate) async fn send(
    builder: RequestBuilder,
    channel: &Channel,
    upstream_model: &str,
) -> Result<RelayResponse, UpstreamError> {
    let response = builder.send().await.map_err(|e| classify_transport(&e))?;
    read_response(response, channel, upstream_model).await
}

fn classify_transport(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout()
    } else {
        UpstreamError::transport(format!("upstream request failed: {err}"))
    }
}

async fn read_response(
    response: Response,
    channel: &Channel,
    upstream_model: &str,
) -> Result<RelayResponse, UpstreamError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;

    if !status.is_success() {
        let error = parse_error_body(status.as_u16(), &body);
        warn!(
            channel = channel.id,
            status = status.as_u16(),
            code = error.code.as_deref().unwrap_or(""),
            "Upstream returned an error"
        );
        return Err(error);
    }

    let body: Value = serde_json::from_str(&body).map_err(|e| {
        UpstreamError::new(502, format!("upstream returned invalid JSON: {e}"))
            .with_code("bad_response_body")
    })?;

    let usage = body
        .get("usage")
        .cloned()
        .and_then(|usage| serde_json::from_value::<Usage>(usage).ok())
        .unwrap_or_default();
    let actual_model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(upstream_model)
        .to_string();

    Ok(RelayResponse {
        status: status.as_u16(),
        body,
        usage,
        actual_model,
        channel_id: channel.id,
    })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

/// Turn an upstream error body into an [`UpstreamError`].
///
/// Understands the OpenAI error envelope; anything else is kept verbatim
/// as the message.
#[must_use]
pub fn parse_error_body(status: u16, body: &str) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let detail = envelope.error;
            let message = if detail.message.is_empty() {
                format!("upstream returned status {status}")
            } else {
                detail.message
            };
            let code = match detail.code {
                Some(Value::String(code)) => Some(code),
                Some(Value::Number(code)) => Some(code.to_string()),
                _ => detail.error_type,
            };
            let mut error = UpstreamError::new(status, message);
            error.code = code;
            error
        }
        Err(_) if body.trim().is_empty() => {
            UpstreamError::new(status, format!("upstream returned status {status}"))
        }
        Err(_) => UpstreamError::new(status, body.trim().to_string()),
    }
}
