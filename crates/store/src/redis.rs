//! Redis-backed volatile store.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use futures_util::{StreamExt, future};
use redis::AsyncCommands;

use crate::VolatileError;
use crate::volatile::{MessageStream, PubSubMessage, Result, VolatileStore};

/// Redis connection settings.
///
/// Reads from environment variables:
/// - `REDIS_URL`: connection URL (default: `"redis://localhost:6379"`)
/// - `REDIS_POOL_SIZE`: max pooled connections (default: `16`)
/// - `REDIS_TIMEOUT_MS`: pool wait/create/recycle timeout (default: `500`)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    pub timeout_ms: u64,
}

impl RedisConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),
            timeout_ms: std::env::var("REDIS_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_ms),
        }
    }

    /// Creates a config for the given URL with default pool settings.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            timeout_ms: 500,
        }
    }
}

/// Volatile store backed by a pooled Redis connection.
///
/// Commands borrow a connection from the pool per call. Subscriptions open a
/// dedicated pub/sub connection that is closed when the stream is dropped.
#[derive(Clone)]
pub struct RedisVolatileStore {
    pool: Pool,
    client: redis::Client,
}

impl RedisVolatileStore {
    /// Creates the pool and client. Does not contact the server.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut pool_config = deadpool_redis::Config::from_url(&config.url);
        let pool_settings = pool_config.get_pool_config();
        pool_config.pool = Some(deadpool_redis::PoolConfig {
            max_size: config.pool_size,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(timeout),
            },
            ..pool_settings
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| VolatileError::Unavailable(format!("failed to create Redis pool: {e}")))?;
        let client = redis::Client::open(config.url.as_str())?;

        Ok(Self { pool, client })
    }

    /// Creates the store and verifies the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.ping().await?;
        tracing::info!(url = %config.url, "connected to Redis");
        Ok(store)
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl VolatileStore for RedisVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.pset_ex::<_, _, ()>(key, value, ttl.as_millis() as u64)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.pool.get().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let receivers: u64 = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::debug!(channel, "subscribed to Redis channel");

        let messages = pubsub.into_on_message().filter_map(|msg| {
            let parsed = match msg.get_payload::<String>() {
                Ok(payload) => Some(PubSubMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse pub/sub payload");
                    None
                }
            };
            future::ready(parsed)
        });

        Ok(Box::pin(messages))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
