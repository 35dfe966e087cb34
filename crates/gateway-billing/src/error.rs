//! Billing errors.

use gateway_core::GatewayError;
use thiserror::Error;

/// Errors talking to the billing service
#[derive(Debug, Error)]
pub enum BillingError {
    /// Transport failure
    #[error("billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status
    #[error("billing service returned {status}: {message}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("invalid billing response: {0}")]
    Decode(String),

    /// Invalid service URL
    #[error("invalid billing url: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

impl From<BillingError> for GatewayError {
    fn from(err: BillingError) -> Self {
        Self::BillingUnavailable {
            message: err.to_string(),
        }
    }
}
