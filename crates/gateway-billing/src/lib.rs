//! # Gateway Billing
//!
//! Balance gateway for the relay:
//! - [`BillingService`] abstraction over the external ledger
//! - HTTP implementation and an unlimited implementation for internal use
//! - [`BalanceGateway`] with a cached balance pre-flight
//! - [`BalanceConsumer`] that prices usage and debits it after a call

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod gateway;
pub mod http;
pub mod pricing;
pub mod service;

// Re-export main types
pub use error::{BillingError, BillingResult};
pub use gateway::{BalanceConfig, BalanceConsumer, BalanceGateway, Debit};
pub use http::HttpBillingService;
pub use pricing::{ModelPrice, PriceTable};
pub use service::{BillingService, GroupBalance, UnlimitedBillingService, UNLIMITED_BALANCE};
