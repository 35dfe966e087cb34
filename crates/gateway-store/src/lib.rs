//! # Gateway Store
//!
//! System-of-record implementations for the LLM Relay Gateway.
//!
//! - [`MemoryStore`]: process-local maps, used in tests and when no database
//!   URL is configured
//! - [`SqlStore`]: a sqlx `Any` pool over PostgreSQL or SQLite

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod pool;
pub mod schema;
pub mod sql;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pool::{DatabasePool, PoolConfig};
pub use sql::SqlStore;
