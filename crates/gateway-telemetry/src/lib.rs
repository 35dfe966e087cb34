//! # Gateway Telemetry
//!
//! Observability for the LLM Relay Gateway.
//!
//! This crate provides:
//! - Structured logging setup
//! - Prometheus metrics for relay traffic

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod tracing_setup;

// Re-export main types
pub use metrics::{MetricsError, RelayMetrics};
pub use tracing_setup::{init_tracing, TracingConfig, TracingError};
