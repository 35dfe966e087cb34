//! Store error types.

use gateway_core::GatewayError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// SQL execution error.
    #[error("SQL execution error: {0}")]
    Execution(#[from] sqlx::Error),

    /// A stored JSON column could not be decoded.
    #[error("Corrupt column {column}: {reason}")]
    Decode {
        /// Column name.
        column: &'static str,
        /// Decode failure.
        reason: String,
    },

    /// Unsupported database URL.
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::store(err.to_string())
    }
}
