//! System-of-record collaborator.
//!
//! The durable store shared with the admin surface. The core only needs the
//! reads used on cache miss and registry refresh plus usage bookkeeping.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::model::{Channel, Group, Token, TokenStatus};

/// Durable store for channels, tokens and groups
#[async_trait]
pub trait SystemOfRecord: Send + Sync {
    /// All channels whose status makes them candidates for routing.
    ///
    /// Implementations return rows ordered by ascending id.
    async fn list_enabled_channels(&self) -> GatewayResult<Vec<Channel>>;

    /// Look up a token by its key
    async fn find_token_by_key(&self, key: &str) -> GatewayResult<Option<Token>>;

    /// Look up a group by id
    async fn find_group(&self, id: &str) -> GatewayResult<Option<Group>>;

    /// Add `amount` to a token's used amount
    async fn add_token_used_amount(&self, token_id: i64, amount: f64) -> GatewayResult<()>;

    /// Add `amount` to a group's used amount
    async fn add_group_used_amount(&self, group_id: &str, amount: f64) -> GatewayResult<()>;

    /// Persist a token status change
    async fn update_token_status(&self, token_id: i64, status: TokenStatus) -> GatewayResult<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
