//! Shared application state and its assembly from configuration.

use axum::extract::FromRef;
use gateway_billing::{
    BalanceConfig, BalanceGateway, BillingService, HttpBillingService, ModelPrice, PriceTable,
    UnlimitedBillingService,
};
use gateway_config::{CacheBackendKind, GatewayConfig};
use gateway_core::SystemOfRecord;
use gateway_providers::{ExecutorConfig, ExecutorRegistry};
use gateway_resilience::{
    AdmissionConfig, AdmissionController, CacheBackend, CacheStore, CacheStoreConfig,
    ErrorRateMonitor, ErrorRateMonitorConfig, MemoryCacheBackend, NoopCacheBackend, RateLimiter,
    RedisCacheBackend, RetryConfig, RetryPolicy,
};
use gateway_routing::ChannelRegistry;
use gateway_store::{DatabasePool, MemoryStore, PoolConfig, SqlStore};
use gateway_telemetry::RelayMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::{Authenticator, AuthenticatorConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::extractors::TrustedProxies;

/// Redis key namespace
const REDIS_KEY_PREFIX: &str = "relay";

/// Deadline for a single Redis operation
const REDIS_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// State shared by every handler and background task
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration
    pub config: Arc<GatewayConfig>,
    /// Request dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Channel registry
    pub registry: Arc<ChannelRegistry>,
    /// Error-rate monitor
    pub monitor: Arc<ErrorRateMonitor>,
    /// Sliding-window limiter
    pub limiter: Arc<RateLimiter>,
    /// Cache in front of the system of record
    pub cache: Arc<CacheStore>,
    /// Metrics, when enabled
    pub metrics: Option<RelayMetrics>,
    /// Peers allowed to forward the caller address
    pub trusted_proxies: Arc<TrustedProxies>,
}

impl FromRef<AppState> for Arc<TrustedProxies> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.trusted_proxies)
    }
}

impl AppState {
    /// Start building state from `config`
    #[must_use]
    pub fn builder(config: GatewayConfig) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }

    /// Connect every configured backend and assemble the state.
    ///
    /// # Errors
    /// Fails when the database, Redis or billing client cannot be set up.
    pub async fn from_config(config: GatewayConfig) -> ServerResult<Self> {
        config.validate_all()?;

        let store: Arc<dyn SystemOfRecord> = match &config.database.url {
            Some(url) => {
                let pool_config = PoolConfig::default()
                    .max_connections(config.database.max_connections)
                    .connect_timeout(config.database.connect_timeout);
                let store = SqlStore::new(DatabasePool::connect(url, &pool_config).await?);
                store.ensure_schema().await?;
                Arc::new(store)
            }
            None => {
                let seed = config.seed.clone();
                info!(
                    channels = seed.channels.len(),
                    tokens = seed.tokens.len(),
                    groups = seed.groups.len(),
                    "Using in-memory system of record"
                );
                Arc::new(MemoryStore::with_records(seed.channels, seed.tokens, seed.groups))
            }
        };

        let mut builder = Self::builder(config).store(store);
        let redis_url = match builder.config.cache.backend {
            CacheBackendKind::Redis => builder.config.cache.redis_url.clone(),
            _ => None,
        };
        if let Some(url) = redis_url {
            let backend =
                RedisCacheBackend::connect(&url, REDIS_KEY_PREFIX, REDIS_OPERATION_TIMEOUT).await?;
            builder = builder.cache_backend(Arc::new(backend));
        }
        builder.build()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .field("channels", &self.registry.snapshot().len())
            .field("cache", &self.cache.backend().name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AppState`]; unset components are derived from the config
pub struct AppStateBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn SystemOfRecord>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    executors: Option<ExecutorRegistry>,
    billing: Option<Arc<dyn BillingService>>,
    metrics: Option<RelayMetrics>,
    rng_seed: Option<u64>,
}

impl AppStateBuilder {
    /// Create a builder
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            store: None,
            cache_backend: None,
            executors: None,
            billing: None,
            metrics: None,
            rng_seed: None,
        }
    }

    /// Use `store` as the system of record
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SystemOfRecord>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `backend` instead of the configured cache backend
    #[must_use]
    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Use `executors` instead of the built-in ones
    #[must_use]
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Use `billing` instead of the configured billing service
    #[must_use]
    pub fn billing(mut self, billing: Arc<dyn BillingService>) -> Self {
        self.billing = Some(billing);
        self
    }

    /// Use `metrics` instead of a fresh registry
    #[must_use]
    pub fn metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Seed channel selection for reproducible tests
    #[must_use]
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Assemble the state. The registry is left empty until refreshed.
    ///
    /// # Errors
    /// Fails when the Redis backend was configured but not supplied, or a
    /// client cannot be built.
    pub fn build(self) -> ServerResult<AppState> {
        let config = self.config;

        let store = self.store.unwrap_or_else(|| {
            let seed = config.seed.clone();
            Arc::new(MemoryStore::with_records(seed.channels, seed.tokens, seed.groups))
        });

        let backend: Arc<dyn CacheBackend> = match self.cache_backend {
            Some(backend) => backend,
            None => match config.cache.backend {
                CacheBackendKind::None => Arc::new(NoopCacheBackend),
                CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new()),
                CacheBackendKind::Redis => {
                    return Err(ServerError::Config(gateway_config::ConfigError::Invalid(
                        "redis cache backend must be connected before building state".to_string(),
                    )))
                }
            },
        };

        let cache = Arc::new(CacheStore::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            CacheStoreConfig {
                ttl: config.cache.ttl,
                ttl_jitter: config.cache.ttl_jitter,
            },
        ));

        let mut registry = ChannelRegistry::new(Arc::clone(&store));
        if let Some(seed) = self.rng_seed {
            registry = registry.with_seed(seed);
        }
        let registry = Arc::new(registry);

        let monitor = Arc::new(ErrorRateMonitor::new(monitor_config(&config)));
        let limiter = Arc::new(RateLimiter::new(backend));
        let admission = AdmissionController::new(Arc::clone(&limiter), admission_config(&config));

        let billing = match self.billing {
            Some(billing) => billing,
            None => billing_service(&config)?,
        };
        let balance = BalanceGateway::new(billing, Arc::clone(&cache), balance_config(&config));

        let executors = match self.executors {
            Some(executors) => executors,
            None => ExecutorRegistry::with_defaults(
                &ExecutorConfig::default().with_timeout(config.retry.attempt_timeout),
            )
            .map_err(|e| ServerError::Executor(e.to_string()))?,
        };

        let metrics = match (self.metrics, config.telemetry.metrics_enabled) {
            (Some(metrics), _) => Some(metrics),
            (None, true) => Some(RelayMetrics::new()?),
            (None, false) => None,
        };

        let mut dispatcher = Dispatcher::builder()
            .authenticator(Authenticator::new(
                Arc::clone(&cache),
                AuthenticatorConfig::from(&config.auth),
            ))
            .admission(admission)
            .registry(Arc::clone(&registry))
            .monitor(Arc::clone(&monitor))
            .balance(balance)
            .cache(Arc::clone(&cache))
            .executors(executors)
            .retry(RetryPolicy::new(retry_config(&config)))
            .error_rate_weighting(config.registry.error_rate_weighting);
        if let Some(metrics) = &metrics {
            dispatcher = dispatcher.metrics(metrics.clone());
        }

        info!(
            store = store.name(),
            cache = cache.backend().name(),
            distributed = limiter.is_distributed(),
            "Gateway state assembled"
        );

        let trusted_proxies = Arc::new(TrustedProxies::parse(config.auth.trusted_proxies.as_slice())?);

        Ok(AppState {
            trusted_proxies,
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher.build()?),
            registry,
            monitor,
            limiter,
            cache,
            metrics,
        })
    }
}

fn monitor_config(config: &GatewayConfig) -> ErrorRateMonitorConfig {
    let monitor = &config.monitor;
    ErrorRateMonitorConfig {
        enabled: monitor.enabled,
        auto_ban: monitor.auto_ban,
        error_rate_threshold: monitor.error_rate_threshold,
        min_requests: monitor.min_requests,
        slice_width: monitor.slice_width,
        slice_count: u32::try_from(monitor.slice_count).unwrap_or(u32::MAX),
        ban_duration: monitor.ban_duration,
    }
}

fn admission_config(config: &GatewayConfig) -> AdmissionConfig {
    let limits = &config.rate_limit;
    AdmissionConfig {
        global_qpm: limits.global_qpm,
        group_qpm: limits.group_qpm,
        default_model_rpm: limits.default_model_rpm,
        model_rpm: limits.model_rpm.clone(),
        window: limits.window,
    }
}

fn retry_config(config: &GatewayConfig) -> RetryConfig {
    let retry = &config.retry;
    RetryConfig {
        max_retries: retry.max_retries,
        attempt_timeout: retry.attempt_timeout,
        rate_limited_delay: retry.rate_limited_delay,
        rate_limited_jitter: retry.rate_limited_jitter,
    }
}

fn balance_config(config: &GatewayConfig) -> BalanceConfig {
    let billing = &config.billing;
    let price = |p: &gateway_config::ModelPrice| ModelPrice::new(p.input_per_1k, p.output_per_1k);
    let prices = billing
        .model_prices
        .iter()
        .fold(PriceTable::new(price(&billing.default_price)), |table, (model, p)| {
            table.with_model(model.clone(), price(p))
        });

    BalanceConfig {
        cache_ttl: billing.cache_ttl,
        min_charge: billing.min_charge,
        fail_open: billing.fail_open,
        app_name: billing.app_name.clone(),
        prices,
    }
}

fn billing_service(config: &GatewayConfig) -> ServerResult<Arc<dyn BillingService>> {
    let billing = &config.billing;
    match (billing.enabled, billing.base_url.as_deref()) {
        (true, Some(base_url)) => Ok(Arc::new(HttpBillingService::new(
            base_url,
            billing.api_key.clone(),
            billing.request_timeout,
        )?)),
        (true, None) => Err(ServerError::Config(gateway_config::ConfigError::Invalid(
            "billing.enabled requires billing.base_url".to_string(),
        ))),
        (false, _) => Ok(Arc::new(UnlimitedBillingService)),
    }
}
