//! Billing service abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BillingResult;

/// Balance reported for groups that are never charged
pub const UNLIMITED_BALANCE: f64 = f64::MAX;

/// Remaining balance of a group and the ledger identity to debit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBalance {
    /// Remaining amount
    pub amount: f64,
    /// Opaque consumer identity understood by the billing service
    #[serde(default)]
    pub identity: String,
}

/// External ledger holding group balances
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Current balance of `group`
    async fn get_balance(&self, group: &str) -> BillingResult<GroupBalance>;

    /// Debit `amount` from `group`
    async fn consume(
        &self,
        group: &str,
        identity: &str,
        amount: f64,
        app_name: &str,
    ) -> BillingResult<()>;

    /// Service name for logs
    fn name(&self) -> &'static str;
}

/// Service used when billing is disabled: every group has unlimited balance
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedBillingService;

#[async_trait]
impl BillingService for UnlimitedBillingService {
    async fn get_balance(&self, group: &str) -> BillingResult<GroupBalance> {
        Ok(GroupBalance {
            amount: UNLIMITED_BALANCE,
            identity: group.to_string(),
        })
    }

    async fn consume(
        &self,
        _group: &str,
        _identity: &str,
        _amount: f64,
        _app_name: &str,
    ) -> BillingResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "unlimited"
    }
}
