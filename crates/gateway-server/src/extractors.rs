//! Custom Axum extractors for the gateway.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
};
use gateway_config::ConfigError;
use gateway_core::RequestId;
use ipnetwork::IpNetwork;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ApiError, ServerError, ServerResult};

/// Raw `Authorization` header value, prefixes included
#[derive(Debug, Clone)]
pub struct RawCredential(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for RawCredential
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Ok(Self(value))
    }
}

/// Correlation id from `x-request-id`, or a fresh one
#[derive(Debug, Clone)]
pub struct RequestIdHeader(pub RequestId);

#[async_trait]
impl<S> FromRequestParts<S> for RequestIdHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-request-id")
            .or_else(|| parts.headers.get("x-correlation-id"))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(RequestId::generate, RequestId::from_string);

        Ok(Self(id))
    }
}

/// Proxies whose forwarding headers are believed
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// Parse addresses or CIDR ranges.
    ///
    /// # Errors
    /// Fails on the first entry that is neither.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> ServerResult<Self> {
        let networks = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry.parse::<IpNetwork>().map_err(|e| {
                    ServerError::Config(ConfigError::Invalid(format!(
                        "auth.trusted_proxies entry {entry:?}: {e}"
                    )))
                })
            })
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(Self { networks })
    }

    /// Whether `ip` belongs to a trusted proxy
    #[must_use]
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(ip))
    }

    /// Resolve the caller address.
    ///
    /// Forwarding headers count only when the socket peer is trusted. The
    /// `x-forwarded-for` chain is walked from the right and the first
    /// untrusted hop wins.
    #[must_use]
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        let peer = peer?;
        if !self.is_trusted(peer) {
            return Some(peer);
        }

        if let Some(chain) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            let hops: Vec<IpAddr> = chain
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect();
            if let Some(ip) = hops.iter().rev().find(|ip| !self.is_trusted(**ip)) {
                return Some(*ip);
            }
            if let Some(first) = hops.first() {
                return Some(*first);
            }
        }

        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .or(Some(peer))
    }
}

/// Caller address, resolved through [`TrustedProxies`]
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    Arc<TrustedProxies>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let proxies = Arc::<TrustedProxies>::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(proxies.client_ip(&parts.headers, peer)))
    }
}

/// JSON body extractor with relay-style errors
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {e}")))?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            debug!(error = %e, "JSON parse error");
            ApiError::bad_request(format!("Invalid JSON: {e}"))
        })?;

        Ok(Self(value))
    }
}
