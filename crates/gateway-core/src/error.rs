//! Error taxonomy shared by every gateway crate.
//!
//! Each failure a caller can observe maps onto exactly one [`GatewayError`]
//! variant, which in turn carries a stable HTTP status and a snake_case code.

use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Message used whenever the caller should not learn provider-specific throttling details
pub const UPSTREAM_SATURATED_MESSAGE: &str =
    "the upstream load is saturated, please try again later";

/// Why a credential or tenant check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// No token was presented
    MissingToken,
    /// The token key does not exist
    InvalidToken,
    /// The token was disabled by an operator
    TokenDisabled,
    /// The token is past its expiry
    TokenExpired,
    /// The token has used its whole quota
    QuotaExhausted,
    /// The caller address is outside the token's subnet list
    SubnetMismatch,
    /// The owning group does not exist
    GroupNotFound,
    /// The owning group was disabled
    GroupDisabled,
    /// The requested model is outside the token or group allowlist
    ModelNotAllowed,
}

impl AuthFailure {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::TokenDisabled => "token_disabled",
            Self::TokenExpired => "token_expired",
            Self::QuotaExhausted => "token_quota_exhausted",
            Self::SubnetMismatch => "subnet_not_allowed",
            Self::GroupNotFound => "group_not_found",
            Self::GroupDisabled => "group_disabled",
            Self::ModelNotAllowed => "model_not_allowed",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingToken => "no token provided",
            Self::InvalidToken => "invalid token",
            Self::TokenDisabled => "token is disabled",
            Self::TokenExpired => "token is expired",
            Self::QuotaExhausted => "token quota is exhausted",
            Self::SubnetMismatch => "token is not allowed from this address",
            Self::GroupNotFound => "group not found",
            Self::GroupDisabled => "group is disabled",
            Self::ModelNotAllowed => "model is not available for this token",
        };
        f.write_str(text)
    }
}

/// Main gateway error type
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Bad, missing, expired or exhausted credential
    #[error("{reason}")]
    Unauthorized {
        /// Failure detail
        reason: AuthFailure,
    },

    /// Credential is valid but not allowed here
    #[error("{reason}")]
    Forbidden {
        /// Failure detail
        reason: AuthFailure,
    },

    /// Admission control rejected the request
    #[error("rate limit exceeded ({scope})")]
    RateLimited {
        /// Which tier rejected: global, group or model
        scope: String,
    },

    /// No enabled, unbanned channel can serve the model
    #[error("the upstream load is saturated, please try again later")]
    NoChannelAvailable {
        /// Requested model
        model: String,
    },

    /// Classified failure returned by the upstream executor
    #[error("{message}")]
    Upstream {
        /// HTTP-like status reported by the upstream
        status: u16,
        /// Upstream message
        message: String,
        /// Upstream error code, if any
        code: Option<String>,
    },

    /// The owning group has no remaining balance
    #[error("group {group} balance is not enough")]
    InsufficientBalance {
        /// Group identifier
        group: String,
    },

    /// The billing service could not be reached
    #[error("billing service unavailable: {message}")]
    BillingUnavailable {
        /// Error detail
        message: String,
    },

    /// Distributed cache failure
    #[error("cache error: {message}")]
    Cache {
        /// Error detail
        message: String,
    },

    /// System-of-record failure
    #[error("store error: {message}")]
    Store {
        /// Error detail
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Error detail
        message: String,
    },

    /// Malformed client request
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Error detail
        message: String,
    },

    /// Anything else
    #[error("internal error: {message}")]
    Internal {
        /// Error detail
        message: String,
    },
}

impl GatewayError {
    /// Build an upstream error
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Build a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Build a cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Build an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Build an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code surfaced to the caller
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::NoChannelAvailable { .. } | Self::BillingUnavailable { .. } => 503,
            Self::Upstream { status, .. } => *status,
            Self::InsufficientBalance { .. } => 402,
            Self::InvalidRequest { .. } => 400,
            Self::Cache { .. } | Self::Store { .. } | Self::Config { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Stable snake_case code surfaced to the caller
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::Unauthorized { reason } | Self::Forbidden { reason } => reason.code().to_string(),
            Self::RateLimited { .. } => "rate_limit_exceeded".to_string(),
            Self::NoChannelAvailable { .. } => "upstream_load_saturated".to_string(),
            Self::Upstream { code, status, .. } => code
                .clone()
                .unwrap_or_else(|| format!("upstream_error_{status}")),
            Self::InsufficientBalance { .. } => "insufficient_balance".to_string(),
            Self::BillingUnavailable { .. } => "billing_unavailable".to_string(),
            Self::InvalidRequest { .. } => "invalid_request".to_string(),
            Self::Cache { .. } | Self::Store { .. } | Self::Config { .. } | Self::Internal { .. } => {
                "internal_error".to_string()
            }
        }
    }

    /// Whether the dispatcher may try another channel after this error.
    ///
    /// Only upstream failures are candidates: 400 and 2xx-with-business-error
    /// are terminal, every other status (429, 5xx, auth failures) is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Status-level retry classification used by the dispatcher
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status != 400 && !(200..300).contains(&status)
}
