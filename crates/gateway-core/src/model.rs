//! Domain records: channels, tokens and groups.
//!
//! These mirror the rows kept in the system-of-record. Tokens and groups are
//! also the values stored in the cache, so they round-trip through serde.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Upstream provider kind. Selects which executor handles a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// OpenAI or any OpenAI-compatible endpoint
    #[default]
    OpenAi,
    /// Azure OpenAI
    Azure,
    /// Anthropic
    Anthropic,
    /// Google Gemini
    Gemini,
    /// Alibaba DashScope
    Ali,
    /// Anything else, handled by the fallback executor
    Custom,
}

impl ChannelType {
    /// Numeric code used by the system-of-record
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::OpenAi => 1,
            Self::Azure => 3,
            Self::Anthropic => 14,
            Self::Gemini => 24,
            Self::Ali => 17,
            Self::Custom => 8,
        }
    }

    /// Parse a stored numeric code; unknown codes become [`ChannelType::Custom`]
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::OpenAi,
            3 => Self::Azure,
            14 => Self::Anthropic,
            24 => Self::Gemini,
            17 => Self::Ali,
            _ => Self::Custom,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ali => "ali",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Eligible for routing
    #[default]
    Enabled,
    /// Disabled by an operator
    Disabled,
    /// Disabled automatically after failing health tests
    AutoDisabled,
}

impl ChannelStatus {
    /// Numeric code used by the system-of-record
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 2,
            Self::AutoDisabled => 3,
        }
    }

    /// Parse a stored numeric code
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Enabled,
            3 => Self::AutoDisabled,
            _ => Self::Disabled,
        }
    }
}

/// An upstream provider credential and endpoint
#[derive(Clone, Deserialize)]
pub struct Channel {
    /// Database identifier; also the tie-break order during selection
    pub id: i64,
    /// Provider kind
    #[serde(default, rename = "type")]
    pub channel_type: ChannelType,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Upstream credential
    pub key: SecretString,
    /// Upstream base URL, e.g. `https://api.openai.com`
    #[serde(default)]
    pub base_url: String,
    /// Models served, in configured order
    #[serde(default)]
    pub models: Vec<String>,
    /// Requested model name to upstream model name
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Selection weight; negative values weigh as zero
    #[serde(default)]
    pub priority: i32,
    /// Lifecycle status
    #[serde(default)]
    pub status: ChannelStatus,
    /// Time of the most recent failed channel test
    #[serde(default)]
    pub last_test_error_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Create an enabled channel with no models
    pub fn new(id: i64, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id,
            channel_type: ChannelType::default(),
            name: name.into(),
            key: SecretString::new(key.into()),
            base_url: String::new(),
            models: Vec::new(),
            model_mapping: HashMap::new(),
            priority: 0,
            status: ChannelStatus::Enabled,
            last_test_error_at: None,
        }
    }

    /// Set the provider kind
    #[must_use]
    pub fn with_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the served models
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Add a model remapping
    #[must_use]
    pub fn with_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_mapping.insert(from.into(), to.into());
        self
    }

    /// Set the selection priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the status
    #[must_use]
    pub fn with_status(mut self, status: ChannelStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this channel lists `model`
    #[must_use]
    pub fn serves(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Selection weight derived from priority
    #[must_use]
    pub fn weight(&self) -> u64 {
        u64::try_from(self.priority).unwrap_or(0)
    }

    /// Upstream model name for a requested model
    #[must_use]
    pub fn mapped_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map_or(model, String::as_str)
    }

    /// Expose the upstream credential
    #[must_use]
    pub fn secret(&self) -> &str {
        self.key.expose_secret()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("channel_type", &self.channel_type)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Token lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Usable
    #[default]
    Enabled,
    /// Disabled by an operator
    Disabled,
    /// Marked after the expiry passed
    Expired,
    /// Marked after the quota was used up
    Exhausted,
}

impl TokenStatus {
    /// Numeric code used by the system-of-record
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 2,
            Self::Expired => 3,
            Self::Exhausted => 4,
        }
    }

    /// Parse a stored numeric code
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Enabled,
            3 => Self::Expired,
            4 => Self::Exhausted,
            _ => Self::Disabled,
        }
    }
}

/// A caller credential scoped to a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Database identifier
    pub id: i64,
    /// Opaque key presented by the caller, without prefixes
    pub key: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Owning group
    pub group_id: String,
    /// Allowed models; empty inherits the group's list
    #[serde(default)]
    pub models: Vec<String>,
    /// Spending cap; zero means unlimited
    #[serde(default)]
    pub quota: f64,
    /// Amount spent so far
    #[serde(default)]
    pub used_amount: f64,
    /// Optional expiry
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    /// Comma-separated CIDR list the caller address must match
    #[serde(default)]
    pub subnet: Option<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: TokenStatus,
}

impl Token {
    /// Create an enabled, unlimited token
    pub fn new(id: i64, key: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            name: String::new(),
            group_id: group_id.into(),
            models: Vec::new(),
            quota: 0.0,
            used_amount: 0.0,
            expired_at: None,
            subnet: None,
            status: TokenStatus::Enabled,
        }
    }

    /// Whether the token is past its expiry at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|at| at <= now)
    }

    /// Whether the token has used its whole quota
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.quota > 0.0 && self.used_amount >= self.quota
    }
}

/// Group lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Normal billed tenant
    #[default]
    Enabled,
    /// Disabled by an operator
    Disabled,
    /// Internal tenant; skips balance checks and debits
    Internal,
}

impl GroupStatus {
    /// Numeric code used by the system-of-record
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 2,
            Self::Internal => 3,
        }
    }

    /// Parse a stored numeric code
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Enabled,
            3 => Self::Internal,
            _ => Self::Disabled,
        }
    }
}

/// A billing and tenant boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier
    pub id: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: GroupStatus,
    /// Amount spent by all tokens of the group
    #[serde(default)]
    pub used_amount: f64,
    /// Multiplier applied to per-model RPM budgets; zero is treated as one
    #[serde(default)]
    pub rpm_ratio: f64,
    /// Per-model RPM overrides
    #[serde(default)]
    pub rpm: HashMap<String, u64>,
    /// Group-wide QPM budget; zero uses the configured default
    #[serde(default)]
    pub qpm: u64,
    /// Allowed models; empty allows all
    #[serde(default)]
    pub models: Vec<String>,
}

impl Group {
    /// Create an enabled group with default budgets
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: GroupStatus::Enabled,
            used_amount: 0.0,
            rpm_ratio: 1.0,
            rpm: HashMap::new(),
            qpm: 0,
            models: Vec::new(),
        }
    }

    /// Set the status
    #[must_use]
    pub fn with_status(mut self, status: GroupStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether billing is bypassed for this group
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.status == GroupStatus::Internal
    }

    /// Effective RPM ratio
    #[must_use]
    pub fn effective_rpm_ratio(&self) -> f64 {
        if self.rpm_ratio > 0.0 {
            self.rpm_ratio
        } else {
            1.0
        }
    }
}
