//! Azure OpenAI executor.
//!
//! Same wire format as OpenAI. Differences:
//! - URL structure: `{base}/openai/deployments/{deployment}/chat/completions`
//! - Authentication via API key in `api-key` header
//! - API version required as query parameter
//!
//! The deployment name is the channel's mapped model with dots removed,
//! since Azure deployment names cannot contain them.

use async_trait::async_trait;
use gateway_core::{
    Channel, ChannelType, RelayMode, RelayRequest, RelayResponse, RequestExecutor, UpstreamError,
};
use reqwest::Client;
use tracing::debug;

use crate::openai::{send, ExecutorConfig};

/// Azure OpenAI API version
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Executor for Azure OpenAI channels
#[derive(Debug, Clone)]
pub struct AzureExecutor {
    client: Client,
    api_version: String,
}

impl AzureExecutor {
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
        Self {
            client,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Set the API version
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Endpoint URL for a deployment
    #[must_use]
    pub fn endpoint(&self, base_url: &str, deployment: &str, mode: RelayMode) -> String {
        let operation = match mode {
            RelayMode::ChatCompletions => "chat/completions",
            RelayMode::Completions => "completions",
            RelayMode::Embeddings => "embeddings",
        };
        format!(
            "{}/openai/deployments/{deployment}/{operation}?api-version={}",
            base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Azure deployment name for a model
#[must_use]
pub fn deployment_name(model: &str) -> String {
    model.replace('.', "")
}

#[async_trait]
impl RequestExecutor for AzureExecutor {
    fn channel_types(&self) -> &[ChannelType] {
        &[ChannelType::Azure]
    }

    async fn execute(
        &self,
        channel: &Channel,
        request: &RelayRequest,
    ) -> Result<RelayResponse, UpstreamError> {
        if channel.base_url.is_empty() {
            return Err(UpstreamError::new(500, "azure channel has no base url")
                .with_code("channel_misconfigured"));
        }

        let upstream_model = channel.mapped_model(&request.model);
        let deployment = deployment_name(upstream_model);
        let url = self.endpoint(&channel.base_url, &deployment, request.mode);

        debug!(
            request_id = %request.id,
            channel = channel.id,
            deployment = %deployment,
            "Sending request to Azure OpenAI"
        );

        let builder = self
            .client
            .post(&url)
            .header("api-key", channel.secret())
            .json(&request.payload_for_model(upstream_model));

        send(builder, channel, upstream_model).await
    }
}
