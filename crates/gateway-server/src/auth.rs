//! Token and group authentication.
//!
//! Resolves the presented key to a token and its owning group through the
//! cache store, enforcing status, expiry, quota and subnet restrictions.

use chrono::Utc;
use gateway_core::{
    AuthFailure, GatewayError, GatewayResult, Group, GroupStatus, Token, TokenStatus,
};
use gateway_resilience::CacheStore;
use ipnetwork::IpNetwork;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Token id of the synthetic admin context
pub const ADMIN_TOKEN_ID: i64 = 0;

/// Group id of the synthetic admin context
pub const ADMIN_GROUP_ID: &str = "__admin__";

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Resolved token
    pub token: Token,
    /// Owning group
    pub group: Group,
    /// Whether the reserved admin key was presented
    pub is_admin: bool,
}

impl AuthContext {
    /// Context for the reserved admin key
    #[must_use]
    pub fn admin() -> Self {
        Self {
            token: Token::new(ADMIN_TOKEN_ID, "", ADMIN_GROUP_ID),
            group: Group::new(ADMIN_GROUP_ID).with_status(GroupStatus::Internal),
            is_admin: true,
        }
    }

    /// Admission control is skipped for the admin context only
    #[must_use]
    pub fn skips_admission(&self) -> bool {
        self.is_admin
    }

    /// Balance checks, debits and usage bookkeeping are skipped
    #[must_use]
    pub fn skips_billing(&self) -> bool {
        self.is_admin || self.group.is_internal()
    }

    /// Effective model allowlist; `None` allows every model
    #[must_use]
    pub fn allowed_models(&self) -> Option<&[String]> {
        if !self.token.models.is_empty() {
            Some(&self.token.models)
        } else if !self.group.models.is_empty() {
            Some(&self.group.models)
        } else {
            None
        }
    }

    /// Whether `model` passes the allowlist
    #[must_use]
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models()
            .map_or(true, |models| models.iter().any(|m| m == model))
    }
}

/// Authenticator settings
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Reserved key that yields the admin context
    pub admin_key: Option<SecretString>,
    /// Prefixes stripped from the presented key, in order
    pub key_prefixes: Vec<String>,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            admin_key: None,
            key_prefixes: vec!["Bearer ".to_string(), "sk-".to_string()],
        }
    }
}

impl From<&gateway_config::AuthConfig> for AuthenticatorConfig {
    fn from(config: &gateway_config::AuthConfig) -> Self {
        Self {
            admin_key: config.admin_key.clone(),
            key_prefixes: config.key_prefixes.clone(),
        }
    }
}

/// Resolves presented keys to an [`AuthContext`]
pub struct Authenticator {
    cache: Arc<CacheStore>,
    key_prefixes: Vec<String>,
    admin_key_hash: Option<[u8; 32]>,
}

impl Authenticator {
    /// Create an authenticator reading through `cache`
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, config: AuthenticatorConfig) -> Self {
        let admin_key_hash = config
            .admin_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
            .filter(|key| !key.is_empty())
            .map(hash_key);
        Self {
            cache,
            key_prefixes: config.key_prefixes,
            admin_key_hash,
        }
    }

    /// Strip configured prefixes from a raw credential
    #[must_use]
    pub fn strip_key<'a>(&self, raw: &'a str) -> &'a str {
        let mut key = raw.trim();
        for prefix in &self.key_prefixes {
            if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                key = rest;
            }
        }
        key.trim()
    }

    /// Authenticate a raw credential presented from `client_ip`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Unauthorized`] for missing, unknown, disabled,
    /// expired or exhausted tokens and [`GatewayError::Forbidden`] for subnet
    /// and group failures.
    pub async fn authenticate(
        &self,
        raw_key: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> GatewayResult<AuthContext> {
        let key = self.strip_key(raw_key.unwrap_or_default());
        if key.is_empty() {
            return Err(unauthorized(AuthFailure::MissingToken));
        }

        if self.is_admin_key(key) {
            debug!("Admin key presented");
            return Ok(AuthContext::admin());
        }

        let token = self
            .cache
            .token(key)
            .await?
            .ok_or_else(|| unauthorized(AuthFailure::InvalidToken))?;

        match token.status {
            TokenStatus::Enabled => {}
            TokenStatus::Disabled => return Err(unauthorized(AuthFailure::TokenDisabled)),
            TokenStatus::Expired => return Err(unauthorized(AuthFailure::TokenExpired)),
            TokenStatus::Exhausted => return Err(unauthorized(AuthFailure::QuotaExhausted)),
        }

        if token.is_expired_at(Utc::now()) {
            self.mark(&token, TokenStatus::Expired).await;
            return Err(unauthorized(AuthFailure::TokenExpired));
        }

        if token.is_exhausted() {
            self.mark(&token, TokenStatus::Exhausted).await;
            return Err(unauthorized(AuthFailure::QuotaExhausted));
        }

        if let Some(subnet) = token.subnet.as_deref().filter(|s| !s.trim().is_empty()) {
            if !subnet_allows(subnet, client_ip) {
                debug!(token = token.id, client_ip = ?client_ip, "Caller outside token subnet");
                return Err(forbidden(AuthFailure::SubnetMismatch));
            }
        }

        let group = self
            .cache
            .group(&token.group_id)
            .await?
            .ok_or_else(|| forbidden(AuthFailure::GroupNotFound))?;
        if group.status == GroupStatus::Disabled {
            return Err(forbidden(AuthFailure::GroupDisabled));
        }

        Ok(AuthContext {
            token,
            group,
            is_admin: false,
        })
    }

    /// Enforce the token or group model allowlist.
    ///
    /// # Errors
    /// Returns [`GatewayError::Forbidden`] with [`AuthFailure::ModelNotAllowed`].
    pub fn check_model(&self, ctx: &AuthContext, model: &str) -> GatewayResult<()> {
        if ctx.allows_model(model) {
            Ok(())
        } else {
            Err(forbidden(AuthFailure::ModelNotAllowed))
        }
    }

    fn is_admin_key(&self, key: &str) -> bool {
        self.admin_key_hash
            .is_some_and(|expected| hash_key(key) == expected)
    }

    async fn mark(&self, token: &Token, status: TokenStatus) {
        if let Err(e) = self.cache.set_token_status(token, status).await {
            warn!(token = token.id, status = ?status, error = %e, "Failed to persist token status");
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("key_prefixes", &self.key_prefixes)
            .field("admin_key", &self.admin_key_hash.is_some())
            .finish_non_exhaustive()
    }
}

/// Whether `client_ip` falls in any CIDR of the comma-separated `subnet`.
/// An unknown address never matches; malformed entries are skipped.
#[must_use]
pub fn subnet_allows(subnet: &str, client_ip: Option<IpAddr>) -> bool {
    let Some(ip) = client_ip else {
        return false;
    };
    subnet
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<IpNetwork>() {
            Ok(network) => Some(network),
            Err(e) => {
                warn!(entry = %entry, error = %e, "Ignoring malformed subnet entry");
                None
            }
        })
        .any(|network| network.contains(ip))
}

/// Hash a key for comparison without keeping the plaintext
fn hash_key(key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

const fn unauthorized(reason: AuthFailure) -> GatewayError {
    GatewayError::Unauthorized { reason }
}

const fn forbidden(reason: AuthFailure) -> GatewayError {
    GatewayError::Forbidden { reason }
}
