//! # Gateway Server
//!
//! HTTP surface and request dispatch for the LLM Relay Gateway.
//!
//! This crate provides:
//! - Token and group authentication
//! - The dispatcher that selects channels, retries and settles usage
//! - Axum routes for the OpenAI-compatible relay endpoints
//! - Background maintenance tasks and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod tasks;

// Re-export main types
pub use auth::{AuthContext, Authenticator, AuthenticatorConfig};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherBuilder};
pub use error::{ApiError, ServerError, ServerResult};
pub use extractors::{ClientIp, TrustedProxies};
pub use routes::create_router;
pub use server::Server;
pub use shutdown::{shutdown_signal, wait_for_stop, ShutdownController};
pub use state::{AppState, AppStateBuilder};
pub use tasks::{spawn_background_tasks, spawn_periodic};
