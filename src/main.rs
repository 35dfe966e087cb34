//! # LLM Relay Gateway
//!
//! OpenAI-compatible relay that spreads requests over upstream channels.
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration
//! llm-relay-gateway
//!
//! # Start with a config file (YAML, or TOML by extension)
//! llm-relay-gateway --config /path/to/config.yaml
//!
//! # Start with environment overrides
//! GATEWAY_PORT=9000 GATEWAY_REDIS_URL=redis://127.0.0.1/ llm-relay-gateway
//! ```

use anyhow::{bail, Context};
use gateway_config::load_config;
use gateway_server::{shutdown_signal, AppState, Server};
use gateway_telemetry::{init_tracing, TracingConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = format!("{e:#}"), "Gateway failed");
        eprintln!("llm-relay-gateway: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = config_path_from_args(std::env::args().skip(1))?;
    let config = load_config(config_path.as_deref())
        .await
        .context("failed to load configuration")?;

    let tracing_config = TracingConfig::default()
        .with_log_level(config.telemetry.log_level.clone())
        .with_json(config.telemetry.json_logs);
    init_tracing(&tracing_config).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        cache = ?config.cache.backend,
        "Starting LLM Relay Gateway"
    );

    let state = AppState::from_config(config)
        .await
        .context("failed to assemble gateway state")?;
    Server::new(state)
        .run(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

fn config_path_from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => match args.next() {
                Some(value) => path = Some(PathBuf::from(value)),
                None => bail!("{arg} requires a path"),
            },
            other => match other.strip_prefix("--config=") {
                Some(value) => path = Some(PathBuf::from(value)),
                None => bail!("unexpected argument: {other}"),
            },
        }
    }
    Ok(path)
}
