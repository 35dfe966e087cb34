//! Configuration errors.

use gateway_core::GatewayError;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax or shape error
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML syntax or shape error
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Field-level validation failure
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Cross-field validation failure
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Environment override could not be parsed
    #[error("invalid value for {var}: {value}")]
    Env {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
