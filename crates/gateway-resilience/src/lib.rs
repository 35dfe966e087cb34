//! # Gateway Resilience
//!
//! Shared state that keeps the relay healthy under load:
//! - Cache backends (none, in-memory, Redis) and the read-through cache store
//! - Sliding-window rate limiting and three-tier admission control
//! - Per-(model, channel) error-rate monitor with automatic bans
//! - Retry policy for upstream attempts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cache_store;
pub mod monitor;
pub mod rate_limit;
pub mod redis_backend;
pub mod retry;

// Re-export main types
pub use cache::{
    decode_fields, encode_fields, CacheBackend, CacheError, CacheFields, CacheResult,
    MemoryCacheBackend, NoopCacheBackend, WindowDecision,
};
pub use cache_store::{jittered_ttl, CacheKind, CacheStore, CacheStoreConfig, USED_AMOUNT_FIELD};
pub use monitor::{ErrorRateMonitor, ErrorRateMonitorConfig, RecordOutcome};
pub use rate_limit::{
    AdmissionConfig, AdmissionController, MemoryRateLimiter, RateLimiter, SlidingWindow,
};
pub use redis_backend::RedisCacheBackend;
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder};
