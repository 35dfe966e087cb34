//! Request dispatch with cross-channel retries.
//!
//! One call to [`Dispatcher::dispatch`] authenticates the caller, runs
//! admission control and the balance pre-flight, then tries channels one at a
//! time until an attempt succeeds, a terminal error is seen or the retry
//! budget runs out. Every attempt feeds the error-rate monitor.

use gateway_billing::{BalanceConsumer, BalanceGateway};
use gateway_core::{
    message_with_request_id, Channel, GatewayError, GatewayResult, RelayRequest, RelayResponse,
    RequestId, UpstreamError, UPSTREAM_SATURATED_MESSAGE,
};
use gateway_providers::ExecutorRegistry;
use gateway_resilience::{AdmissionController, CacheStore, ErrorRateMonitor, RecordOutcome, RetryPolicy};
use gateway_routing::ChannelRegistry;
use gateway_telemetry::{relay_request_span, RelayMetrics};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::auth::{AuthContext, Authenticator};

/// Failed dispatch, carrying the correlation id of the request
#[derive(Debug, Clone)]
pub struct DispatchError {
    /// Underlying error
    pub error: GatewayError,
    /// Correlation identifier
    pub request_id: RequestId,
}

impl DispatchError {
    /// HTTP status surfaced to the caller
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    /// User-visible message with the request id appended
    #[must_use]
    pub fn message(&self) -> String {
        message_with_request_id(&self.error.to_string(), &self.request_id)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for DispatchError {}

/// Orchestrates auth, admission, billing, selection and retries
pub struct Dispatcher {
    authenticator: Authenticator,
    admission: AdmissionController,
    registry: Arc<ChannelRegistry>,
    monitor: Arc<ErrorRateMonitor>,
    balance: BalanceGateway,
    cache: Arc<CacheStore>,
    executors: ExecutorRegistry,
    retry: RetryPolicy,
    metrics: Option<RelayMetrics>,
    error_rate_weighting: bool,
}

impl Dispatcher {
    /// Start building a dispatcher
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Authenticator used for every request
    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Admission controller
    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Relay `request` for the caller holding `raw_key`.
    ///
    /// # Errors
    /// Returns the first terminal failure, or the last upstream failure once
    /// retries are exhausted.
    pub async fn dispatch(
        &self,
        raw_key: Option<&str>,
        client_ip: Option<IpAddr>,
        request: RelayRequest,
    ) -> Result<RelayResponse, DispatchError> {
        let span = relay_request_span!(request.id, request.model);
        let result = self
            .relay(raw_key, client_ip.or(request.client_ip), &request)
            .instrument(span)
            .await;

        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status_code(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_request(&request.model, status);
        }

        result.map_err(|error| DispatchError {
            error,
            request_id: request.id,
        })
    }

    async fn relay(
        &self,
        raw_key: Option<&str>,
        client_ip: Option<IpAddr>,
        request: &RelayRequest,
    ) -> GatewayResult<RelayResponse> {
        let model = request.model.as_str();

        let ctx = self.authenticator.authenticate(raw_key, client_ip).await?;
        self.authenticator.check_model(&ctx, model)?;

        if !ctx.skips_admission() {
            if let Err(e) = self.admission.admit(&ctx.group, model).await {
                if let (GatewayError::RateLimited { scope }, Some(metrics)) = (&e, &self.metrics) {
                    metrics.record_rate_limited(scope);
                }
                return Err(e);
            }
        }
        self.admission.record_model_request(model).await;

        let consumer = if ctx.skips_billing() {
            None
        } else {
            self.balance.preflight(&ctx.group.id).await?
        };

        let mut excluded = HashSet::new();
        let mut channel = self.select(model, &excluded)?;
        let mut retries = 0u32;

        loop {
            debug!(channel = channel.id, attempt = retries, "Dispatching to channel");
            let started = Instant::now();
            let outcome = self.execute(&channel, request).await;
            if let Some(metrics) = &self.metrics {
                metrics.observe_upstream(model, channel.id, started.elapsed());
            }

            let err = match outcome {
                Ok(response) => {
                    self.monitor.record_request(model, channel.id, false, false);
                    self.settle(&ctx, consumer.as_ref(), model, &response).await;
                    info!(
                        channel = channel.id,
                        retries,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "Request relayed"
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            let status = err.status;
            if self.retry.should_monitor(status) {
                let try_ban = !self.retry.channel_has_permission(status);
                let outcome = self.monitor.record_request(model, channel.id, true, try_ban);
                if outcome == RecordOutcome::Banned {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_ban(model, channel.id);
                    }
                }
            }

            if !self.retry.is_retryable(status) || !self.retry.has_budget(retries) {
                debug!(channel = channel.id, status, retries, "Giving up on request");
                return Err(surface(err));
            }

            excluded.insert(channel.id);
            let next = match self.select(model, &excluded) {
                Ok(next) if next.id != channel.id => next,
                _ => {
                    debug!(channel = channel.id, status, "No other channel to retry on");
                    return Err(surface(err));
                }
            };

            if let Some(delay) = self.retry.delay_for(status) {
                debug!(delay = ?delay, "Upstream rate limited, pausing before retry");
                tokio::time::sleep(delay).await;
            }

            retries += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(model);
            }
            warn!(
                failed_channel = channel.id,
                next_channel = next.id,
                status,
                error = %err.message,
                retries,
                "Retrying on another channel"
            );
            channel = next;
        }
    }

    fn select(&self, model: &str, excluded: &HashSet<i64>) -> GatewayResult<Arc<Channel>> {
        let banned = self.monitor.banned_channels(model);
        let rates: Option<HashMap<i64, f64>> = self
            .error_rate_weighting
            .then(|| self.monitor.model_error_rates(model));
        self.registry
            .select_channel_weighted(model, excluded, &banned, rates.as_ref())
    }

    async fn execute(
        &self,
        channel: &Channel,
        request: &RelayRequest,
    ) -> Result<RelayResponse, UpstreamError> {
        let executor = self.executors.for_channel(channel).ok_or_else(|| {
            UpstreamError::new(
                500,
                format!("no executor for channel type {}", channel.channel_type),
            )
            .with_code("executor_missing")
        })?;
        self.retry
            .run_attempt(executor.execute(channel, request))
            .await
    }

    async fn settle(
        &self,
        ctx: &AuthContext,
        consumer: Option<&BalanceConsumer>,
        model: &str,
        response: &RelayResponse,
    ) {
        if ctx.skips_billing() || response.usage.is_empty() {
            return;
        }

        let amount = match consumer {
            Some(consumer) => {
                let debit = consumer.debit(model, &response.usage).await;
                if !debit.settled {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_billing_failure();
                    }
                }
                debit.amount
            }
            None => {
                let config = self.balance.config();
                config
                    .prices
                    .charge(model, &response.usage, config.min_charge)
            }
        };

        if amount > 0.0 {
            if let Err(e) = self.cache.record_usage(&ctx.token, amount).await {
                warn!(token = ctx.token.id, amount, error = %e, "Failed to record usage");
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("executors", &self.executors)
            .field("retry", &self.retry)
            .field("error_rate_weighting", &self.error_rate_weighting)
            .finish_non_exhaustive()
    }
}

/// Last upstream error as shown to the caller; 429 details are hidden
fn surface(err: UpstreamError) -> GatewayError {
    let status = err.status;
    let mut error = GatewayError::from(err);
    if status == 429 {
        if let GatewayError::Upstream { message, .. } = &mut error {
            *message = UPSTREAM_SATURATED_MESSAGE.to_string();
        }
    }
    error
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    authenticator: Option<Authenticator>,
    admission: Option<AdmissionController>,
    registry: Option<Arc<ChannelRegistry>>,
    monitor: Option<Arc<ErrorRateMonitor>>,
    balance: Option<BalanceGateway>,
    cache: Option<Arc<CacheStore>>,
    executors: Option<ExecutorRegistry>,
    retry: Option<RetryPolicy>,
    metrics: Option<RelayMetrics>,
    error_rate_weighting: bool,
}

impl DispatcherBuilder {
    /// Set the authenticator
    #[must_use]
    pub fn authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Set the admission controller
    #[must_use]
    pub fn admission(mut self, admission: AdmissionController) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Set the channel registry
    #[must_use]
    pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the error-rate monitor
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<ErrorRateMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Set the balance gateway
    #[must_use]
    pub fn balance(mut self, balance: BalanceGateway) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Set the cache store used for usage bookkeeping
    #[must_use]
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the executors
    #[must_use]
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the metrics sink
    #[must_use]
    pub fn metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Divide channel weights by their recent error rate
    #[must_use]
    pub fn error_rate_weighting(mut self, enabled: bool) -> Self {
        self.error_rate_weighting = enabled;
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    /// Returns [`GatewayError::Config`] naming the first missing component.
    pub fn build(self) -> GatewayResult<Dispatcher> {
        fn required<T>(value: Option<T>, name: &str) -> GatewayResult<T> {
            value.ok_or_else(|| GatewayError::config(format!("dispatcher is missing {name}")))
        }

        Ok(Dispatcher {
            authenticator: required(self.authenticator, "an authenticator")?,
            admission: required(self.admission, "an admission controller")?,
            registry: required(self.registry, "a channel registry")?,
            monitor: required(self.monitor, "an error-rate monitor")?,
            balance: required(self.balance, "a balance gateway")?,
            cache: required(self.cache, "a cache store")?,
            executors: required(self.executors, "executors")?,
            retry: self.retry.unwrap_or_else(RetryPolicy::with_defaults),
            metrics: self.metrics,
            error_rate_weighting: self.error_rate_weighting,
        })
    }
}
