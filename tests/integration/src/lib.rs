//! Integration tests for the LLM Relay Gateway
//!
//! This crate covers:
//! - The relay scenarios (single channel, failover, global admission, auto-ban)
//! - HTTP endpoints over a real listener
//! - Upstream executors against mock providers
//! - Cache store behavior across backends
//! - Rate limiting and channel selection

pub mod fixtures;
pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod cache_tests;
#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod provider_tests;
#[cfg(test)]
mod rate_limit_tests;
#[cfg(test)]
mod routing_tests;
