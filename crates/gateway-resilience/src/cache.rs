//! Cache backend abstraction.
//!
//! Values are stored as flat field maps (a Redis hash) so single fields can be
//! adjusted atomically on the server without a read-modify-write round trip.
//!
//! Backends:
//! - [`NoopCacheBackend`]: always misses; every read falls through to the store
//! - [`MemoryCacheBackend`]: process-local, for single-instance deployments
//! - [`crate::redis_backend::RedisCacheBackend`]: shared across gateway instances

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::GatewayError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Field map stored under one cache key
pub type CacheFields = HashMap<String, String>;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Connection or command failure
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Cache operation timeout after {0:?}")]
    Timeout(Duration),

    /// Backend does not provide the operation
    #[error("Cache backend not available: {0}")]
    Unavailable(&'static str),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        Self::cache(err.to_string())
    }
}

/// Outcome of a windowed admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the call was admitted and recorded
    pub allowed: bool,
    /// Entries in the window after the call
    pub count: u64,
}

/// Cache backend trait for polymorphic cache implementations
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read all fields of `key`; `None` on miss
    async fn get_fields(&self, key: &str) -> CacheResult<Option<CacheFields>>;

    /// Replace `key` with `fields`, expiring after `ttl`
    async fn set_fields(&self, key: &str, fields: CacheFields, ttl: Duration) -> CacheResult<()>;

    /// Delete a key
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically add `delta` to a numeric field.
    ///
    /// Returns the new value, or `None` when the key is absent (absent keys
    /// are left absent so the next read repopulates them from the store).
    async fn adjust(&self, key: &str, field: &str, delta: f64) -> CacheResult<Option<f64>>;

    /// Atomically drop entries older than `window`, then record the call if
    /// fewer than `limit` entries remain. A `limit` of zero always records.
    async fn windowed_admit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> CacheResult<WindowDecision>;

    /// Entries currently inside `window`, without recording a call
    async fn window_count(&self, key: &str, window: Duration) -> CacheResult<u64>;

    /// Drop expired entries; returns how many were removed.
    ///
    /// Backends whose server expires keys on its own keep the default.
    fn purge_expired(&self) -> usize {
        0
    }

    /// Check if the backend is healthy
    async fn health_check(&self) -> CacheResult<()>;

    /// Get backend name for metrics
    fn name(&self) -> &'static str;

    /// Check if backend is shared across gateway instances
    fn is_distributed(&self) -> bool;
}

/// Encode a serializable struct as a field map. Each field holds JSON text.
///
/// # Errors
/// Fails when `value` does not serialize to a JSON object.
pub fn encode_fields<T: Serialize>(value: &T) -> CacheResult<CacheFields> {
    match serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(field, value)| (field, value.to_string()))
            .collect()),
        other => Err(CacheError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Decode a field map produced by [`encode_fields`].
///
/// Fields that are not valid JSON are read as plain strings.
///
/// # Errors
/// Fails when the fields do not match `T`.
pub fn decode_fields<T: DeserializeOwned>(fields: CacheFields) -> CacheResult<T> {
    let map = fields
        .into_iter()
        .map(|(field, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (field, value)
        })
        .collect();
    serde_json::from_value(Value::Object(map)).map_err(|e| CacheError::Serialization(e.to_string()))
}

/// Backend that never stores anything.
///
/// Selecting it turns the cache off without any branch in request-path code.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheBackend;

#[async_trait]
impl CacheBackend for NoopCacheBackend {
    async fn get_fields(&self, _key: &str) -> CacheResult<Option<CacheFields>> {
        Ok(None)
    }

    async fn set_fields(&self, _key: &str, _fields: CacheFields, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn adjust(&self, _key: &str, _field: &str, _delta: f64) -> CacheResult<Option<f64>> {
        Ok(None)
    }

    async fn windowed_admit(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> CacheResult<WindowDecision> {
        Err(CacheError::Unavailable("noop backend keeps no windows"))
    }

    async fn window_count(&self, _key: &str, _window: Duration) -> CacheResult<u64> {
        Err(CacheError::Unavailable("noop backend keeps no windows"))
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

/// Local cache entry with instant-based expiry
#[derive(Debug)]
struct MemoryEntry {
    fields: CacheFields,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache backend (for single-instance deployments).
///
/// Field adjustments run under the map's per-shard write lock, which makes
/// them linearizable within the process. Rate-limit windows are not kept
/// here: a non-distributed backend leaves them to the limiter's local map.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCacheBackend {
    /// Create a new memory cache backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live and expired-but-unpurged entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get_fields(&self, key: &str) -> CacheResult<Option<CacheFields>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.fields.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set_fields(&self, key: &str, fields: CacheFields, ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn adjust(&self, key: &str, field: &str, delta: f64) -> CacheResult<Option<f64>> {
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }

        let current = match entry.fields.get(field) {
            Some(raw) => raw.parse::<f64>().map_err(|e| {
                CacheError::Serialization(format!("field {field} is not numeric: {e}"))
            })?,
            None => 0.0,
        };
        let updated = current + delta;
        entry.fields.insert(field.to_string(), updated.to_string());
        Ok(Some(updated))
    }

    async fn windowed_admit(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> CacheResult<WindowDecision> {
        Err(CacheError::Unavailable("memory backend keeps no windows"))
    }

    async fn window_count(&self, _key: &str, _window: Duration) -> CacheResult<u64> {
        Err(CacheError::Unavailable("memory backend keeps no windows"))
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
