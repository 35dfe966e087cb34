//! Redis cache backend.
//!
//! Values are hashes. Field adjustment and windowed admission run as Lua
//! scripts so every gateway instance sees linearizable updates. Window
//! timestamps come from the Redis server clock.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::cache::{CacheBackend, CacheError, CacheFields, CacheResult, WindowDecision};

const ADJUST_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HINCRBYFLOAT', KEYS[1], ARGV[1], ARGV[2])
end
return false
";

const WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local record = tonumber(ARGV[3])
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
while true do
  local oldest = redis.call('LINDEX', key, 0)
  if not oldest or now - tonumber(oldest) < window then
    break
  end
  redis.call('LPOP', key)
end
local count = redis.call('LLEN', key)
if record == 0 then
  return {1, count}
end
if limit == 0 or count < limit then
  redis.call('RPUSH', key, now)
  redis.call('PEXPIRE', key, window)
  return {1, count + 1}
end
return {0, count}
";

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Redis-backed cache shared by all gateway instances
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    key_prefix: String,
    operation_timeout: Duration,
    adjust_script: Script,
    window_script: Script,
}

impl RedisCacheBackend {
    /// Connect to `url`; every key is namespaced under `key_prefix`.
    ///
    /// # Errors
    /// Fails when the URL is invalid or the first connection cannot be made.
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        operation_timeout: Duration,
    ) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(operation_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(operation_timeout))??;
        let key_prefix = key_prefix.into();
        info!(prefix = %key_prefix, "Connected to Redis cache");

        Ok(Self {
            conn,
            key_prefix,
            operation_timeout,
            adjust_script: Script::new(ADJUST_SCRIPT),
            window_script: Script::new(WINDOW_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.key_prefix)
        }
    }

    async fn bounded<F, T>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.operation_timeout)),
        }
    }

    async fn window(&self, key: &str, limit: u64, window: Duration, record: bool) -> CacheResult<WindowDecision> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let reply: Vec<i64> = self
            .bounded(
                self.window_script
                    .key(key)
                    .arg(limit)
                    .arg(window_ms)
                    .arg(u8::from(record))
                    .invoke_async(&mut conn),
            )
            .await?;

        match reply.as_slice() {
            [allowed, count] => Ok(WindowDecision {
                allowed: *allowed == 1,
                count: u64::try_from(*count).unwrap_or(0),
            }),
            _ => Err(CacheError::Serialization(format!(
                "unexpected window script reply: {reply:?}"
            ))),
        }
    }
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("key_prefix", &self.key_prefix)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get_fields(&self, key: &str) -> CacheResult<Option<CacheFields>> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let fields: HashMap<String, String> = self.bounded(conn.hgetall(key)).await?;
        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn set_fields(&self, key: &str, fields: CacheFields, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&key).ignore();
        if !fields.is_empty() {
            let hset = pipe.cmd("HSET").arg(&key);
            for (field, value) in &fields {
                hset.arg(field).arg(value);
            }
            hset.ignore();
            pipe.cmd("PEXPIRE").arg(&key).arg(ttl_ms).ignore();
        }
        let () = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let _: i64 = self.bounded(conn.del(key)).await?;
        Ok(())
    }

    async fn adjust(&self, key: &str, field: &str, delta: f64) -> CacheResult<Option<f64>> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let reply: Option<String> = self
            .bounded(
                self.adjust_script
                    .key(key)
                    .arg(field)
                    .arg(delta)
                    .invoke_async(&mut conn),
            )
            .await?;

        reply
            .map(|raw| {
                raw.parse::<f64>().map_err(|e| {
                    CacheError::Serialization(format!("field {field} is not numeric: {e}"))
                })
            })
            .transpose()
    }

    async fn windowed_admit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> CacheResult<WindowDecision> {
        self.window(key, limit, window, true).await
    }

    async fn window_count(&self, key: &str, window: Duration) -> CacheResult<u64> {
        Ok(self.window(key, 0, window, false).await?.count)
    }

    async fn health_check(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
