//! Configuration loading.

use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::{CacheBackendKind, GatewayConfig};
use crate::error::{ConfigError, ConfigResult};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Load configuration from `path`, or from `GATEWAY_CONFIG` when `path` is
/// `None`, then apply environment overrides and validate.
///
/// A missing path yields the defaults.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, an override is
/// malformed, or validation fails.
pub async fn load_config(path: Option<&Path>) -> ConfigResult<GatewayConfig> {
    let path: Option<PathBuf> = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

    let mut config = match path {
        Some(path) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            info!(path = %path.display(), "Loading configuration file");
            parse_config(&content, &path)?
        }
        None => {
            debug!("No configuration file given, using defaults");
            GatewayConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate_all()?;
    Ok(config)
}

/// Parse configuration text; the format follows the file extension
/// (`.toml`, otherwise YAML).
///
/// # Errors
/// Returns a parse error for malformed content.
pub fn parse_config(content: &str, path: &Path) -> ConfigResult<GatewayConfig> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Apply `GATEWAY_*` overrides from the process environment.
///
/// # Errors
/// Returns an error when a numeric variable cannot be parsed.
pub fn apply_env_overrides(config: &mut GatewayConfig) -> ConfigResult<()> {
    apply_env_overrides_from(config, |name| std::env::var(name).ok())
}

/// Apply overrides using a custom variable lookup.
///
/// # Errors
/// Returns an error when a numeric variable cannot be parsed.
pub fn apply_env_overrides_from<F>(config: &mut GatewayConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("GATEWAY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("GATEWAY_PORT") {
        config.server.port = parse_var("GATEWAY_PORT", &port)?;
    }
    if let Some(url) = lookup("GATEWAY_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(url) = lookup("GATEWAY_REDIS_URL") {
        config.cache.redis_url = Some(url);
        config.cache.backend = CacheBackendKind::Redis;
    }
    if let Some(key) = lookup("GATEWAY_ADMIN_KEY") {
        config.auth.admin_key = Some(SecretString::new(key));
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.telemetry.log_level = level;
    }
    if let Some(url) = lookup("GATEWAY_BILLING_URL") {
        config.billing.base_url = Some(url);
        config.billing.enabled = true;
    }
    if let Some(qpm) = lookup("GATEWAY_GLOBAL_QPM") {
        config.rate_limit.global_qpm = parse_var("GATEWAY_GLOBAL_QPM", &qpm)?;
    }
    if let Some(retries) = lookup("GATEWAY_RETRY_TIMES") {
        config.retry.max_retries = parse_var("GATEWAY_RETRY_TIMES", &retries)?;
    }
    if let Some(rate) = lookup("GATEWAY_AUTO_BAN_RATE") {
        config.monitor.error_rate_threshold = parse_var("GATEWAY_AUTO_BAN_RATE", &rate)?;
    }
    if let Some(enabled) = lookup("GATEWAY_AUTO_BAN") {
        config.monitor.auto_ban = parse_var("GATEWAY_AUTO_BAN", &enabled)?;
    }
    Ok(())
}

fn parse_var<T: FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
