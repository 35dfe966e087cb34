//! Request executor collaborator.
//!
//! Executors perform the actual upstream call for a resolved channel. The
//! gateway keys them by [`ChannelType`] so adding a provider stays local.

use async_trait::async_trait;
use std::fmt;

use crate::error::GatewayError;
use crate::model::{Channel, ChannelType};
use crate::request::{RelayRequest, RelayResponse, Usage};

/// Typed upstream failure with an HTTP-like status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    /// Status reported by the upstream, or synthesized for transport failures
    pub status: u16,
    /// Error message
    pub message: String,
    /// Provider error code, if any
    pub code: Option<String>,
    /// Usage consumed before the failure, if reported
    pub usage: Option<Usage>,
}

impl UpstreamError {
    /// Create an upstream error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            usage: None,
        }
    }

    /// Attach a provider error code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Transport-level failure (connection refused, reset, DNS)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(502, message)
    }

    /// Upstream did not answer within the attempt deadline
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(504, "upstream request timed out").with_code("upstream_timeout")
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream returned {}: {}", self.status, self.message)
    }
}

impl std::error::Error for UpstreamError {}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream {
            status: err.status,
            message: err.message,
            code: err.code,
        }
    }
}

/// Performs an upstream call for one channel kind
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Channel kinds this executor can serve
    fn channel_types(&self) -> &[ChannelType];

    /// Execute `request` against `channel`.
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// aborts the upstream call.
    async fn execute(
        &self,
        channel: &Channel,
        request: &RelayRequest,
    ) -> Result<RelayResponse, UpstreamError>;
}
