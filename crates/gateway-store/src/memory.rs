//! In-memory system-of-record.

use async_trait::async_trait;
use gateway_core::{
    Channel, ChannelStatus, GatewayResult, Group, SystemOfRecord, Token, TokenStatus,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local store. Channel reads are ordered by id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<i64, Channel>>,
    tokens: RwLock<HashMap<String, Token>>,
    groups: RwLock<HashMap<String, Group>>,
    reads: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records
    #[must_use]
    pub fn with_records(channels: Vec<Channel>, tokens: Vec<Token>, groups: Vec<Group>) -> Self {
        let store = Self::new();
        for channel in channels {
            store.upsert_channel(channel);
        }
        for token in tokens {
            store.upsert_token(token);
        }
        for group in groups {
            store.upsert_group(group);
        }
        store
    }

    /// Insert or replace a channel
    pub fn upsert_channel(&self, channel: Channel) {
        self.channels.write().insert(channel.id, channel);
    }

    /// Remove a channel
    pub fn remove_channel(&self, id: i64) -> Option<Channel> {
        self.channels.write().remove(&id)
    }

    /// Change a channel's status
    pub fn set_channel_status(&self, id: i64, status: ChannelStatus) {
        if let Some(channel) = self.channels.write().get_mut(&id) {
            channel.status = status;
        }
    }

    /// Insert or replace a token
    pub fn upsert_token(&self, token: Token) {
        self.tokens.write().insert(token.key.clone(), token);
    }

    /// Insert or replace a group
    pub fn upsert_group(&self, group: Group) {
        self.groups.write().insert(group.id.clone(), group);
    }

    /// Fetch a token without counting it as a read
    #[must_use]
    pub fn token(&self, key: &str) -> Option<Token> {
        self.tokens.read().get(key).cloned()
    }

    /// Fetch a group without counting it as a read
    #[must_use]
    pub fn group(&self, id: &str) -> Option<Group> {
        self.groups.read().get(id).cloned()
    }

    /// Number of token and group lookups served; lets tests observe cache hits
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SystemOfRecord for MemoryStore {
    async fn list_enabled_channels(&self) -> GatewayResult<Vec<Channel>> {
        Ok(self
            .channels
            .read()
            .values()
            .filter(|c| c.status == ChannelStatus::Enabled)
            .cloned()
            .collect())
    }

    async fn find_token_by_key(&self, key: &str) -> GatewayResult<Option<Token>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tokens.read().get(key).cloned())
    }

    async fn find_group(&self, id: &str) -> GatewayResult<Option<Group>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.groups.read().get(id).cloned())
    }

    async fn add_token_used_amount(&self, token_id: i64, amount: f64) -> GatewayResult<()> {
        if let Some(token) = self.tokens.write().values_mut().find(|t| t.id == token_id) {
            token.used_amount += amount;
        }
        Ok(())
    }

    async fn add_group_used_amount(&self, group_id: &str, amount: f64) -> GatewayResult<()> {
        if let Some(group) = self.groups.write().get_mut(group_id) {
            group.used_amount += amount;
        }
        Ok(())
    }

    async fn update_token_status(&self, token_id: i64, status: TokenStatus) -> GatewayResult<()> {
        if let Some(token) = self.tokens.write().values_mut().find(|t| t.id == token_id) {
            token.status = status;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
