//! Redis client shared by the list stores.

use crate::config::RedisConfig;
use redis::{aio::ConnectionManager, Client, RedisError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while connecting to Redis.
#[derive(Debug, Error)]
pub enum RedisClientError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
    #[error("timed out connecting to Redis after {0:?}")]
    Timeout(Duration),
}

/// A connected Redis client.
///
/// `conn` is a multiplexed connection for non-blocking commands. Blocking
/// pops must not share it, so [`RedisClient::dedicated_connection`] opens
/// separate ones.
#[derive(Clone)]
pub struct RedisClient {
    pub(crate) client: Client,
    pub(crate) conn: ConnectionManager,
    pub(crate) config: RedisConfig,
}

impl RedisClient {
    /// Connect with the given configuration.
    pub async fn new(config: RedisConfig) -> Result<Self, RedisClientError> {
        let url = config.build_connection_url();
        let client = Client::open(url)?;
        let conn = connect(&client, config.connection_timeout).await?;
        debug!(prefix = %config.key_prefix, "connected to redis");

        Ok(Self {
            client,
            conn,
            config,
        })
    }

    /// Open another connection, used for commands that block the server side.
    pub async fn dedicated_connection(&self) -> Result<ConnectionManager, RedisClientError> {
        connect(&self.client, self.config.connection_timeout).await
    }

    /// Get the key prefix for Redis keys.
    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    /// Create a prefixed key for Redis.
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix(), key)
    }
}

async fn connect(client: &Client, timeout: Duration) -> Result<ConnectionManager, RedisClientError> {
    tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
        .await
        .map_err(|_| RedisClientError::Timeout(timeout))?
        .map_err(RedisClientError::from)
}
