//! Read-through cache over the system of record.
//!
//! Cache failures never reach callers: they are logged and treated as a
//! miss, so a broken cache degrades to direct store reads.

use gateway_core::{GatewayResult, Group, SystemOfRecord, Token, TokenStatus};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{decode_fields, encode_fields, CacheBackend};

/// Field holding accumulated spend on cached tokens and groups
pub const USED_AMOUNT_FIELD: &str = "used_amount";

/// Namespaces of cached records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Token keyed by its secret
    Token,
    /// Group keyed by id
    Group,
    /// Remaining balance keyed by group id
    Balance,
}

impl CacheKind {
    /// Key prefix for this kind
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Group => "group",
            Self::Balance => "balance",
        }
    }

    /// Full cache key for `id`
    #[must_use]
    pub fn key(self, id: &str) -> String {
        format!("{}:{id}", self.prefix())
    }
}

/// TTL settings for cached records
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    /// Base TTL for tokens and groups
    pub ttl: Duration,
    /// Random spread applied to every TTL, as a fraction of it
    pub ttl_jitter: f64,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(180),
            ttl_jitter: 0.25,
        }
    }
}

/// `base` scaled by a random factor in `[1 - ratio, 1 + ratio]`.
/// The ratio is clamped to `[0, 0.5]`.
#[must_use]
pub fn jittered_ttl(base: Duration, ratio: f64) -> Duration {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 0.5) } else { 0.0 };
    if ratio == 0.0 || base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio));
    base.mul_f64(factor)
}

/// Cache in front of the system of record
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    store: Arc<dyn SystemOfRecord>,
    config: CacheStoreConfig,
}

impl CacheStore {
    /// Create a cache store
    #[must_use]
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        store: Arc<dyn SystemOfRecord>,
        config: CacheStoreConfig,
    ) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Underlying backend
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Underlying system of record
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SystemOfRecord> {
        &self.store
    }

    /// Drop expired entries from a process-local backend
    pub fn purge_expired(&self) -> usize {
        let removed = self.backend.purge_expired();
        if removed > 0 {
            debug!(removed, backend = self.backend.name(), "Purged expired cache entries");
        }
        removed
    }

    /// Cached value, or `None` on miss or backend failure
    pub async fn get<T: DeserializeOwned>(&self, kind: CacheKind, id: &str) -> Option<T> {
        let key = kind.key(id);
        match self.backend.get_fields(&key).await {
            Ok(Some(fields)) => match decode_fields(fields) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    self.invalidate(kind, id).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, backend = self.backend.name(), error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Cache `value` for `ttl`, jittered
    pub async fn set<T: Serialize>(&self, kind: CacheKind, id: &str, value: &T, ttl: Duration) {
        let key = kind.key(id);
        let fields = match encode_fields(value) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(key = %key, error = %e, "Value cannot be cached");
                return;
            }
        };
        let ttl = jittered_ttl(ttl, self.config.ttl_jitter);
        if let Err(e) = self.backend.set_fields(&key, fields, ttl).await {
            warn!(key = %key, backend = self.backend.name(), error = %e, "Cache write failed");
        }
    }

    /// Drop a cached value
    pub async fn invalidate(&self, kind: CacheKind, id: &str) {
        let key = kind.key(id);
        if let Err(e) = self.backend.delete(&key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    /// Add `delta` to a numeric field of a cached value.
    /// Returns the new value, or `None` when nothing is cached.
    pub async fn atomic_adjust(
        &self,
        kind: CacheKind,
        id: &str,
        field: &str,
        delta: f64,
    ) -> Option<f64> {
        let key = kind.key(id);
        match self.backend.adjust(&key, field, delta).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, field, error = %e, "Cache adjust failed");
                None
            }
        }
    }

    /// Token by secret, read through the cache.
    ///
    /// # Errors
    /// Propagates system-of-record failures.
    pub async fn token(&self, key: &str) -> GatewayResult<Option<Token>> {
        if let Some(token) = self.get::<Token>(CacheKind::Token, key).await {
            return Ok(Some(token));
        }
        let token = self.store.find_token_by_key(key).await?;
        if let Some(token) = &token {
            debug!(token_id = token.id, "Token cache miss, repopulating");
            self.set(CacheKind::Token, key, token, self.config.ttl).await;
        }
        Ok(token)
    }

    /// Group by id, read through the cache.
    ///
    /// # Errors
    /// Propagates system-of-record failures.
    pub async fn group(&self, id: &str) -> GatewayResult<Option<Group>> {
        if let Some(group) = self.get::<Group>(CacheKind::Group, id).await {
            return Ok(Some(group));
        }
        let group = self.store.find_group(id).await?;
        if let Some(group) = &group {
            debug!(group = %group.id, "Group cache miss, repopulating");
            self.set(CacheKind::Group, id, group, self.config.ttl).await;
        }
        Ok(group)
    }

    /// Add spend to a token and its group, in the store and the cached copies.
    ///
    /// # Errors
    /// Propagates system-of-record failures.
    pub async fn record_usage(&self, token: &Token, amount: f64) -> GatewayResult<()> {
        if amount <= 0.0 {
            return Ok(());
        }
        self.store.add_token_used_amount(token.id, amount).await?;
        self.store
            .add_group_used_amount(&token.group_id, amount)
            .await?;

        self.atomic_adjust(CacheKind::Token, &token.key, USED_AMOUNT_FIELD, amount)
            .await;
        self.atomic_adjust(CacheKind::Group, &token.group_id, USED_AMOUNT_FIELD, amount)
            .await;
        Ok(())
    }

    /// Persist a token status and drop the cached copy.
    ///
    /// # Errors
    /// Propagates system-of-record failures.
    pub async fn set_token_status(&self, token: &Token, status: TokenStatus) -> GatewayResult<()> {
        self.store.update_token_status(token.id, status).await?;
        self.invalidate(CacheKind::Token, &token.key).await;
        Ok(())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}
