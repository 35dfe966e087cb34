//! Configuration sections.

use gateway_core::{Channel, Group, Token};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::error::{ConfigError, ConfigResult};

/// Root gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener
    #[validate(nested)]
    pub server: ServerConfig,
    /// System-of-record connection
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Cache backend
    #[validate(nested)]
    pub cache: CacheConfig,
    /// Channel registry refresh
    pub registry: RegistryConfig,
    /// Admission control budgets
    pub rate_limit: RateLimitConfig,
    /// Error-rate monitor
    #[validate(nested)]
    pub monitor: MonitorConfig,
    /// Retry budget
    #[validate(nested)]
    pub retry: RetryConfig,
    /// External billing service
    #[validate(nested)]
    pub billing: BillingConfig,
    /// Caller authentication
    pub auth: AuthConfig,
    /// Logging and metrics
    pub telemetry: TelemetryConfig,
    /// Records loaded into the in-memory store when no database is configured
    pub seed: SeedConfig,
}

impl GatewayConfig {
    /// Validate field ranges and cross-field constraints.
    ///
    /// # Errors
    /// Returns the first failing constraint.
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;

        if self.cache.backend == CacheBackendKind::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "cache.backend is redis but cache.redis_url is not set".to_string(),
            ));
        }

        if self.billing.enabled {
            let base = self.billing.base_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid("billing.enabled requires billing.base_url".to_string())
            })?;
            url::Url::parse(base)
                .map_err(|e| ConfigError::Invalid(format!("billing.base_url: {e}")))?;
        }

        for (name, value) in [
            ("monitor.slice_width", self.monitor.slice_width),
            ("monitor.sweep_interval", self.monitor.sweep_interval),
            ("registry.refresh_interval", self.registry.refresh_interval),
            ("rate_limit.window", self.rate_limit.window),
            ("rate_limit.eviction_interval", self.rate_limit.eviction_interval),
            ("cache.purge_interval", self.cache.purge_interval),
        ] {
            require_non_zero(name, value)?;
        }

        if self.rate_limit.idle_eviction < self.rate_limit.window {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.idle_eviction ({:?}) must not be shorter than rate_limit.window ({:?})",
                self.rate_limit.idle_eviction, self.rate_limit.window
            )));
        }

        Ok(())
    }
}

fn require_non_zero(name: &str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,
    /// Maximum accepted request body, in bytes
    #[validate(range(min = 1024))]
    pub body_limit: usize,
    /// Maximum time to drain in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            body_limit: 10 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// System-of-record connection
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://` or `sqlite:` URL; the in-memory store is used when unset
    pub url: Option<String>,
    /// Pool size
    #[validate(range(min = 1))]
    pub max_connections: u32,
    /// Connection acquire timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// No cache: every read goes to the system-of-record
    #[default]
    None,
    /// Process-local cache
    Memory,
    /// Shared Redis cache
    Redis,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend kind
    pub backend: CacheBackendKind,
    /// Redis URL, required for the redis backend
    pub redis_url: Option<String>,
    /// Base TTL for token and group entries
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Relative TTL jitter, 0.0 to 0.5
    #[validate(range(min = 0.0, max = 0.5))]
    pub ttl_jitter: f64,
    /// Interval of the expired-entry purge for the memory backend
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::None,
            redis_url: None,
            ttl: Duration::from_secs(180),
            ttl_jitter: 0.25,
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Channel registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between snapshot rebuilds
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Divide channel weight by its recent error rate during selection
    pub error_rate_weighting: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(180),
            error_rate_weighting: true,
        }
    }
}

/// Admission control budgets. Zero disables a tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per window across the whole gateway
    pub global_qpm: u64,
    /// Default requests per window for each group
    pub group_qpm: u64,
    /// Default requests per window per group and model
    pub default_model_rpm: u64,
    /// Per-model RPM budgets, scaled by the group's ratio
    pub model_rpm: HashMap<String, u64>,
    /// Admission window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// In-memory keys untouched for this long are evicted
    #[serde(with = "humantime_serde")]
    pub idle_eviction: Duration,
    /// Interval of the in-memory eviction task
    #[serde(with = "humantime_serde")]
    pub eviction_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_qpm: 0,
            group_qpm: 0,
            default_model_rpm: 0,
            model_rpm: HashMap::new(),
            window: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(300),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

/// Error-rate monitor configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorConfig {
    /// Record statistics at all
    pub enabled: bool,
    /// Ban pairs whose error rate crosses the threshold
    pub auto_ban: bool,
    /// Error rate at or above which a pair is banned
    #[validate(range(min = 0.0, max = 1.0))]
    pub error_rate_threshold: f64,
    /// Minimum requests in the window before a verdict
    #[validate(range(min = 1))]
    pub min_requests: u64,
    /// Width of one time slice
    #[serde(with = "humantime_serde")]
    pub slice_width: Duration,
    /// Number of slices kept
    #[validate(range(min = 1, max = 600))]
    pub slice_count: usize,
    /// Ban length
    #[serde(with = "humantime_serde")]
    pub ban_duration: Duration,
    /// Interval of the idle-entry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_ban: true,
            error_rate_threshold: 0.5,
            min_requests: 20,
            slice_width: Duration::from_secs(10),
            slice_count: 6,
            ban_duration: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Retry budget
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first one
    #[validate(range(max = 20))]
    pub max_retries: u32,
    /// Deadline for a single upstream attempt
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Base pause before retrying after an upstream 429
    #[serde(with = "humantime_serde")]
    pub rate_limited_delay: Duration,
    /// Random extra pause added to the 429 delay
    #[serde(with = "humantime_serde")]
    pub rate_limited_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(300),
            rate_limited_delay: Duration::from_secs(1),
            rate_limited_jitter: Duration::from_secs(1),
        }
    }
}

/// Flat price applied when no model-specific price exists
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct ModelPrice {
    /// Price per 1000 prompt tokens
    pub input_per_1k: f64,
    /// Price per 1000 completion tokens
    pub output_per_1k: f64,
}

/// External billing service
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct BillingConfig {
    /// Use the HTTP billing service; otherwise balance is unlimited
    pub enabled: bool,
    /// Billing service base URL
    pub base_url: Option<String>,
    /// Bearer credential for the billing service
    pub api_key: Option<SecretString>,
    /// Application name reported with each debit
    pub app_name: String,
    /// Billing request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// TTL of the cached balance
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Smallest billable amount; debits are rounded up to a multiple of it
    #[validate(range(min = 0.0))]
    pub min_charge: f64,
    /// Proceed when the billing service is unreachable
    pub fail_open: bool,
    /// Default price
    pub default_price: ModelPrice,
    /// Per-model prices
    pub model_prices: HashMap<String, ModelPrice>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            app_name: "llm-relay-gateway".to_string(),
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(30),
            min_charge: 0.0001,
            fail_open: true,
            default_price: ModelPrice::default(),
            model_prices: HashMap::new(),
        }
    }
}

/// Caller authentication
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reserved key for operational traffic; never rate-limited or billed
    pub admin_key: Option<SecretString>,
    /// Prefixes stripped from presented keys, in order
    pub key_prefixes: Vec<String>,
    /// Peers, as addresses or CIDR ranges, whose `x-forwarded-for` and
    /// `x-real-ip` headers are believed
    pub trusted_proxies: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_key: None,
            key_prefixes: vec!["Bearer ".to_string(), "sk-".to_string()],
            trusted_proxies: Vec::new(),
        }
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

/// Records loaded into the in-memory system-of-record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Channels
    pub channels: Vec<Channel>,
    /// Tokens
    pub tokens: Vec<Token>,
    /// Groups
    pub groups: Vec<Group>,
}
