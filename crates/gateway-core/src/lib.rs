//! # Gateway Core
//!
//! Core types, traits, and error handling for the LLM Relay Gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Channel, token and group records
//! - Relay request and response types
//! - The request executor and system-of-record collaborator traits
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod model;
pub mod request;
pub mod store;

// Re-export commonly used types
pub use error::{is_retryable_status, AuthFailure, GatewayError, GatewayResult, UPSTREAM_SATURATED_MESSAGE};
pub use executor::{RequestExecutor, UpstreamError};
pub use model::{Channel, ChannelStatus, ChannelType, Group, GroupStatus, Token, TokenStatus};
pub use request::{message_with_request_id, RelayMode, RelayRequest, RelayResponse, RequestId, Usage};
pub use store::SystemOfRecord;
