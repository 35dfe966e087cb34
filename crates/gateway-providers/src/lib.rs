//! # Gateway Providers
//!
//! Request executors for upstream channels:
//! - OpenAI-compatible passthrough (OpenAI and any compatible endpoint)
//! - Azure OpenAI (deployment URLs, `api-key` header)
//!
//! Executors are looked up by channel type through [`ExecutorRegistry`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod azure;
pub mod openai;
pub mod registry;

// Re-export main types
pub use azure::{deployment_name, AzureExecutor, DEFAULT_API_VERSION};
pub use openai::{
    join_url, parse_error_body, ExecutorConfig, OpenAiCompatibleExecutor, DEFAULT_OPENAI_BASE_URL,
};
pub use registry::ExecutorRegistry;
