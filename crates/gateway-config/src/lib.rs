//! # Gateway Config
//!
//! Configuration management for the LLM Relay Gateway.
//!
//! Configuration is read from a YAML or TOML file, overlaid with `GATEWAY_*`
//! environment variables, then validated before any component is built.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    AuthConfig, BillingConfig, CacheBackendKind, CacheConfig, DatabaseConfig, GatewayConfig,
    ModelPrice, MonitorConfig, RateLimitConfig, RegistryConfig, RetryConfig, SeedConfig,
    ServerConfig, TelemetryConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_env_overrides, apply_env_overrides_from, load_config, parse_config};
