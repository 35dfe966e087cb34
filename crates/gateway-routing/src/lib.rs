//! # Gateway Routing
//!
//! Channel registry and weighted channel selection for the relay gateway.
//!
//! The registry holds an atomically swapped snapshot of enabled channels,
//! indexed by model. Selection is a weighted roulette over the channels
//! that are neither excluded by the current request nor banned by the
//! error-rate monitor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod registry;
pub mod selector;

// Re-export main types
pub use registry::{ChannelRegistry, RegistrySnapshot};
pub use selector::{candidates, clamp_error_rate, pick, Candidate, MIN_ERROR_RATE};
