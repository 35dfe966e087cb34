//! Balance pre-flight and post-call debits.

use gateway_core::{GatewayError, GatewayResult, Usage};
use gateway_resilience::{CacheKind, CacheStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::BillingResult;
use crate::pricing::PriceTable;
use crate::service::{BillingService, GroupBalance};

/// Field holding the cached remaining amount
const AMOUNT_FIELD: &str = "amount";

/// Balance gateway configuration
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// TTL of the cached balance
    pub cache_ttl: Duration,
    /// Smallest billable amount
    pub min_charge: f64,
    /// Proceed when the billing service is unreachable
    pub fail_open: bool,
    /// Application name reported with each debit
    pub app_name: String,
    /// Prices
    pub prices: PriceTable,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            min_charge: 0.0001,
            fail_open: true,
            app_name: "llm-relay-gateway".to_string(),
            prices: PriceTable::default(),
        }
    }
}

/// Outcome of a debit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Debit {
    /// Amount charged
    pub amount: f64,
    /// Whether the billing service accepted the debit
    pub settled: bool,
}

/// Reads group balances through the cache and hands out consumers
pub struct BalanceGateway {
    service: Arc<dyn BillingService>,
    cache: Arc<CacheStore>,
    config: Arc<BalanceConfig>,
}

impl BalanceGateway {
    /// Create a gateway
    #[must_use]
    pub fn new(service: Arc<dyn BillingService>, cache: Arc<CacheStore>, config: BalanceConfig) -> Self {
        Self {
            service,
            cache,
            config: Arc::new(config),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    /// Remaining balance of `group_id` and a consumer to debit it.
    ///
    /// # Errors
    /// Returns the billing service failure on a cache miss.
    pub async fn remaining_balance(&self, group_id: &str) -> BillingResult<(f64, BalanceConsumer)> {
        let balance = match self.cache.get::<GroupBalance>(CacheKind::Balance, group_id).await {
            Some(balance) => balance,
            None => {
                let balance = self.service.get_balance(group_id).await?;
                self.cache
                    .set(CacheKind::Balance, group_id, &balance, self.config.cache_ttl)
                    .await;
                balance
            }
        };

        let consumer = BalanceConsumer {
            group_id: group_id.to_string(),
            identity: balance.identity,
            service: Arc::clone(&self.service),
            cache: Arc::clone(&self.cache),
            config: Arc::clone(&self.config),
        };
        Ok((balance.amount, consumer))
    }

    /// Check that `group_id` may spend before dispatching.
    ///
    /// Returns `None` when the billing service is unreachable and the
    /// gateway is configured to fail open; the request then goes unbilled.
    ///
    /// # Errors
    /// Returns [`GatewayError::InsufficientBalance`] for an empty balance and
    /// [`GatewayError::BillingUnavailable`] when failing closed.
    pub async fn preflight(&self, group_id: &str) -> GatewayResult<Option<BalanceConsumer>> {
        match self.remaining_balance(group_id).await {
            Ok((amount, _)) if amount <= 0.0 => {
                debug!(group = %group_id, amount, "Group balance exhausted");
                Err(GatewayError::InsufficientBalance {
                    group: group_id.to_string(),
                })
            }
            Ok((_, consumer)) => Ok(Some(consumer)),
            Err(e) if self.config.fail_open => {
                warn!(group = %group_id, service = self.service.name(), error = %e, "Billing unavailable, proceeding unbilled");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for BalanceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceGateway")
            .field("service", &self.service.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Debits one group's balance after a successful call
#[derive(Clone)]
pub struct BalanceConsumer {
    group_id: String,
    identity: String,
    service: Arc<dyn BillingService>,
    cache: Arc<CacheStore>,
    config: Arc<BalanceConfig>,
}

impl BalanceConsumer {
    /// Group being debited
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Price `usage` on `model` and debit it.
    ///
    /// The cached balance is decremented before the service call; a failed
    /// service call is logged and reported as unsettled, not rolled back.
    pub async fn debit(&self, model: &str, usage: &Usage) -> Debit {
        let amount = self
            .config
            .prices
            .charge(model, usage, self.config.min_charge);
        if amount <= 0.0 {
            return Debit {
                amount: 0.0,
                settled: true,
            };
        }

        self.cache
            .atomic_adjust(CacheKind::Balance, &self.group_id, AMOUNT_FIELD, -amount)
            .await;

        let settled = match self
            .service
            .consume(&self.group_id, &self.identity, amount, &self.config.app_name)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    group = %self.group_id,
                    model = %model,
                    amount,
                    error = %e,
                    "Balance debit failed"
                );
                false
            }
        };
        Debit { amount, settled }
    }
}

impl std::fmt::Debug for BalanceConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceConsumer")
            .field("group_id", &self.group_id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
