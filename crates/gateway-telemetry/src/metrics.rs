//! Prometheus metrics for relay traffic.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics registration or encoding failure
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prometheus rejected a metric
    #[error("metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),
    /// Encoded output was not UTF-8
    #[error("metrics output is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Counters and histograms for the relay path
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    retries_total: IntCounterVec,
    bans_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    billing_failures_total: IntCounter,
    upstream_duration: HistogramVec,
}

impl RelayMetrics {
    /// Create metrics registered on a fresh registry
    ///
    /// # Errors
    /// Returns error if a metric cannot be created or registered
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    ///
    /// # Errors
    /// Returns error if a metric cannot be created or registered
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let requests_total = IntCounterVec::new(
            Opts::new("relay_requests_total", "Relayed requests by model and final status"),
            &["model", "status"],
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new("relay_retries_total", "Retries after a failed attempt"),
            &["model"],
        )?;
        let bans_total = IntCounterVec::new(
            Opts::new("relay_channel_bans_total", "Channel/model pairs banned"),
            &["model", "channel"],
        )?;
        let rate_limited_total = IntCounterVec::new(
            Opts::new("relay_rate_limited_total", "Requests rejected by admission control"),
            &["scope"],
        )?;
        let billing_failures_total = IntCounter::with_opts(Opts::new(
            "relay_billing_failures_total",
            "Balance debits the billing service did not accept",
        ))?;
        let upstream_duration = HistogramVec::new(
            HistogramOpts::new("relay_upstream_duration_seconds", "Upstream attempt latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["model", "channel"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(bans_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(billing_failures_total.clone()))?;
        registry.register(Box::new(upstream_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            retries_total,
            bans_total,
            rate_limited_total,
            billing_failures_total,
            upstream_duration,
        })
    }

    /// Count a finished request
    pub fn record_request(&self, model: &str, status: u16) {
        self.requests_total
            .with_label_values(&[model, &status.to_string()])
            .inc();
    }

    /// Count a retry
    pub fn record_retry(&self, model: &str) {
        self.retries_total.with_label_values(&[model]).inc();
    }

    /// Count a ban
    pub fn record_ban(&self, model: &str, channel_id: i64) {
        self.bans_total
            .with_label_values(&[model, &channel_id.to_string()])
            .inc();
    }

    /// Count an admission rejection
    pub fn record_rate_limited(&self, scope: &str) {
        self.rate_limited_total.with_label_values(&[scope]).inc();
    }

    /// Count an unsettled debit
    pub fn record_billing_failure(&self) {
        self.billing_failures_total.inc();
    }

    /// Observe one upstream attempt
    pub fn observe_upstream(&self, model: &str, channel_id: i64, elapsed: Duration) {
        self.upstream_duration
            .with_label_values(&[model, &channel_id.to_string()])
            .observe(elapsed.as_secs_f64());
    }

    /// Registry holding every relay metric
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayMetrics").finish_non_exhaustive()
    }
}
