//! Retry policy for upstream calls.
//!
//! Retries move to a different channel rather than backing off on the same
//! one, so the policy only classifies statuses, bounds each attempt, and
//! picks the pause before the next attempt.

use gateway_core::{is_retryable_status, UpstreamError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
    /// Base pause after an upstream 429
    pub rate_limited_delay: Duration,
    /// Random extra pause after an upstream 429
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

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether another channel may be tried after `status`
    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        is_retryable_status(status)
    }

    /// Whether `status` counts towards the channel's error rate.
    /// A 400 is the caller's fault and is not held against the channel.
    #[must_use]
    pub fn should_monitor(&self, status: u16) -> bool {
        status != 400
    }

    /// Whether the channel's credential is still usable after `status`.
    /// When it is not, the monitor bans the pair at once.
    #[must_use]
    pub fn channel_has_permission(&self, status: u16) -> bool {
        !matches!(status, 401 | 402 | 403)
    }

    /// Whether attempt number `attempt` (0-indexed) may be followed by another
    #[must_use]
    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Pause before the next attempt; only an upstream 429 waits
    #[must_use]
    pub fn delay_for(&self, status: u16) -> Option<Duration> {
        if status != 429 {
            return None;
        }
        let jitter = self.config.rate_limited_jitter;
        let extra = if jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=jitter)
        };
        Some(self.config.rate_limited_delay + extra)
    }

    /// Run one attempt under the attempt timeout.
    ///
    /// # Errors
    /// Returns the attempt's own error, or a 504 [`UpstreamError`] on timeout.
    pub async fn run_attempt<F, T>(&self, attempt: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        match tokio::time::timeout(self.config.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout = ?self.config.attempt_timeout, "Upstream attempt timed out");
                Err(UpstreamError::timeout())
            }
        }
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max retries
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    /// Set the pause after an upstream 429
    #[must_use]
    pub fn rate_limited_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.config.rate_limited_delay = delay;
        self.config.rate_limited_jitter = jitter;
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}
