//! SQL system-of-record over a sqlx `Any` pool.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use gateway_core::{
    Channel, ChannelStatus, ChannelType, GatewayResult, Group, GroupStatus, SystemOfRecord, Token,
    TokenStatus,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::pool::DatabasePool;
use crate::schema::CREATE_TABLES;

const CHANNEL_COLUMNS: &str =
    "id, type, name, api_key, base_url, models, model_mapping, priority, status, last_test_error_at";
const TOKEN_COLUMNS: &str =
    "id, token_key, name, group_id, models, quota, used_amount, expired_at, subnet, status";
const GROUP_COLUMNS: &str = "id, status, used_amount, rpm_ratio, rpm, qpm, models";

/// SQL-backed store
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: DatabasePool,
}

impl SqlStore {
    /// Wrap a connected pool
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes when missing.
    ///
    /// # Errors
    /// Returns the first failing statement.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in CREATE_TABLES {
            sqlx::query(statement).execute(self.pool.inner()).await?;
        }
        debug!("Store schema ensured");
        Ok(())
    }

    /// Insert a channel.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO channels ({CHANNEL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(channel.id)
            .bind(i64::from(channel.channel_type.as_code()))
            .bind(channel.name.clone())
            .bind(channel.secret().to_string())
            .bind(channel.base_url.clone())
            .bind(to_json(&channel.models))
            .bind(to_json(&channel.model_mapping))
            .bind(i64::from(channel.priority))
            .bind(i64::from(channel.status.as_code()))
            .bind(channel.last_test_error_at.map(|at| at.timestamp()))
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Insert a token.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert_token(&self, token: &Token) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO tokens ({TOKEN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(token.id)
            .bind(token.key.clone())
            .bind(token.name.clone())
            .bind(token.group_id.clone())
            .bind(to_json(&token.models))
            .bind(token.quota)
            .bind(token.used_amount)
            .bind(token.expired_at.map(|at| at.timestamp()))
            .bind(token.subnet.clone())
            .bind(i64::from(token.status.as_code()))
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Insert a group.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert_group(&self, group: &Group) -> StoreResult<()> {
        let sql =
            format!("INSERT INTO tenant_groups ({GROUP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)");
        sqlx::query(&sql)
            .bind(group.id.clone())
            .bind(i64::from(group.status.as_code()))
            .bind(group.used_amount)
            .bind(group.rpm_ratio)
            .bind(to_json(&group.rpm))
            .bind(i64::try_from(group.qpm).unwrap_or(i64::MAX))
            .bind(to_json(&group.models))
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn fetch_channels(&self) -> StoreResult<Vec<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE status = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(i64::from(ChannelStatus::Enabled.as_code()))
            .fetch_all(self.pool.inner())
            .await?;
        rows.iter().map(channel_from_row).collect()
    }

    async fn fetch_token(&self, key: &str) -> StoreResult<Option<Token>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_key = $1");
        let row = sqlx::query(&sql)
            .bind(key.to_string())
            .fetch_optional(self.pool.inner())
            .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn fetch_group(&self, id: &str) -> StoreResult<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM tenant_groups WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool.inner())
            .await?;
        row.as_ref().map(group_from_row).transpose()
    }
}

#[async_trait]
impl SystemOfRecord for SqlStore {
    async fn list_enabled_channels(&self) -> GatewayResult<Vec<Channel>> {
        Ok(self.fetch_channels().await?)
    }

    async fn find_token_by_key(&self, key: &str) -> GatewayResult<Option<Token>> {
        Ok(self.fetch_token(key).await?)
    }

    async fn find_group(&self, id: &str) -> GatewayResult<Option<Group>> {
        Ok(self.fetch_group(id).await?)
    }

    async fn add_token_used_amount(&self, token_id: i64, amount: f64) -> GatewayResult<()> {
        sqlx::query("UPDATE tokens SET used_amount = used_amount + $1 WHERE id = $2")
            .bind(amount)
            .bind(token_id)
            .execute(self.pool.inner())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn add_group_used_amount(&self, group_id: &str, amount: f64) -> GatewayResult<()> {
        sqlx::query("UPDATE tenant_groups SET used_amount = used_amount + $1 WHERE id = $2")
            .bind(amount)
            .bind(group_id.to_string())
            .execute(self.pool.inner())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_token_status(&self, token_id: i64, status: TokenStatus) -> GatewayResult<()> {
        sqlx::query("UPDATE tokens SET status = $1 WHERE id = $2")
            .bind(i64::from(status.as_code()))
            .bind(token_id)
            .execute(self.pool.inner())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn from_json<T: DeserializeOwned>(row: &AnyRow, column: &'static str) -> StoreResult<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Decode {
        column,
        reason: e.to_string(),
    })
}

fn code(row: &AnyRow, column: &'static str) -> StoreResult<i32> {
    let value: i64 = row.try_get(column)?;
    i32::try_from(value).map_err(|e| StoreError::Decode {
        column,
        reason: e.to_string(),
    })
}

fn timestamp(row: &AnyRow, column: &'static str) -> StoreResult<Option<DateTime<Utc>>> {
    let value: Option<i64> = row.try_get(column)?;
    Ok(value.and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
}

fn channel_from_row(row: &AnyRow) -> StoreResult<Channel> {
    let key: String = row.try_get("api_key")?;
    Ok(Channel {
        id: row.try_get("id")?,
        channel_type: ChannelType::from_code(code(row, "type")?),
        name: row.try_get("name")?,
        key: SecretString::new(key),
        base_url: row.try_get("base_url")?,
        models: from_json(row, "models")?,
        model_mapping: from_json(row, "model_mapping")?,
        priority: code(row, "priority")?,
        status: ChannelStatus::from_code(code(row, "status")?),
        last_test_error_at: timestamp(row, "last_test_error_at")?,
    })
}

fn token_from_row(row: &AnyRow) -> StoreResult<Token> {
    Ok(Token {
        id: row.try_get("id")?,
        key: row.try_get("token_key")?,
        name: row.try_get("name")?,
        group_id: row.try_get("group_id")?,
        models: from_json(row, "models")?,
        quota: row.try_get("quota")?,
        used_amount: row.try_get("used_amount")?,
        expired_at: timestamp(row, "expired_at")?,
        subnet: row.try_get("subnet")?,
        status: TokenStatus::from_code(code(row, "status")?),
    })
}

fn group_from_row(row: &AnyRow) -> StoreResult<Group> {
    let qpm: i64 = row.try_get("qpm")?;
    Ok(Group {
        id: row.try_get("id")?,
        status: GroupStatus::from_code(code(row, "status")?),
        used_amount: row.try_get("used_amount")?,
        rpm_ratio: row.try_get("rpm_ratio")?,
        rpm: from_json(row, "rpm")?,
        qpm: u64::try_from(qpm).unwrap_or(0),
        models: from_json(row, "models")?,
    })
}
