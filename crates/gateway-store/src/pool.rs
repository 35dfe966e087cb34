//! Database connection pool management.

use serde::{Deserialize, Serialize};
use sqlx::{any::AnyPoolOptions, AnyPool};
use std::time::Duration;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Database flavour, detected from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL database.
    PostgreSQL,
    /// SQLite database.
    SQLite,
}

impl DatabaseType {
    /// Parse from a database URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections.
    pub max_connections: u32,
    /// Minimum number of connections.
    pub min_connections: u32,
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Idle timeout for connections; `None` keeps them forever.
    #[serde(with = "humantime_serde", default)]
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolConfig {
    /// Set maximum connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Single long-lived connection, required for `sqlite::memory:` so every
    /// query sees the same database.
    #[must_use]
    pub fn single_connection() -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: AnyPool,
    database_type: DatabaseType,
}

impl DatabasePool {
    /// Connect a pool for `url`.
    ///
    /// # Errors
    /// Returns an error for an unsupported URL or a failed connection.
    pub async fn connect(url: &str, config: &PoolConfig) -> StoreResult<Self> {
        let database_type =
            DatabaseType::from_url(url).ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))?;

        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);
        if config.idle_timeout.is_none() {
            options = options.max_lifetime(None::<Duration>);
        }

        let pool = options
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(
            database = ?database_type,
            max_connections = config.max_connections,
            "Database pool connected"
        );

        Ok(Self {
            pool,
            database_type,
        })
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Get the database type.
    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
