//! Redis implementation of the list store: LPUSH / BRPOP / RPUSH.

use crate::client::RedisClient;
use async_trait::async_trait;
use goflow_core::broker::{ListStore, ListStoreError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, instrument, trace};

/// Redis lists as a [`ListStore`].
///
/// Pushes share the client's multiplexed connection. Each key that is popped
/// from gets its own connection, since a pending BRPOP stalls every other
/// command queued behind it on the same connection.
pub struct RedisListStore {
    client: RedisClient,
    blocking: Mutex<HashMap<String, ConnectionManager>>,
}

impl RedisListStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            blocking: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Number of items waiting in the list at `key`.
    #[instrument(skip(self), level = "trace")]
    pub async fn len(&self, key: &str) -> Result<usize, ListStoreError> {
        let mut conn = self.client.conn.clone();
        conn.llen(self.client.prefixed_key(key))
            .await
            .map_err(|e| backend_error("LLEN", e))
    }

    /// Drop the list at `key`.
    #[instrument(skip(self), level = "trace")]
    pub async fn clear(&self, key: &str) -> Result<(), ListStoreError> {
        let mut conn = self.client.conn.clone();
        conn.del(self.client.prefixed_key(key))
            .await
            .map_err(|e| backend_error("DEL", e))
    }

    async fn blocking_connection(&self, key: &str) -> Result<ConnectionManager, ListStoreError> {
        let mut conns = self.blocking.lock().await;
        if let Some(conn) = conns.get(key) {
            return Ok(conn.clone());
        }
        let conn = self.client.dedicated_connection().await.map_err(|e| {
            error!(key, error = %e, "failed to open blocking connection");
            ListStoreError::Backend(e.to_string())
        })?;
        conns.insert(key.to_string(), conn.clone());
        Ok(conn)
    }
}

fn backend_error(op: &str, e: redis::RedisError) -> ListStoreError {
    error!(op, error = %e, "redis command failed");
    ListStoreError::Backend(e.to_string())
}

#[async_trait]
impl ListStore for RedisListStore {
    #[instrument(skip(self, value), fields(len = value.len()), level = "trace")]
    async fn push_left(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError> {
        let mut conn = self.client.conn.clone();
        let _: () = conn
            .lpush(self.client.prefixed_key(key), value)
            .await
            .map_err(|e| backend_error("LPUSH", e))?;
        trace!(key, "pushed");
        Ok(())
    }

    #[instrument(skip(self, value), fields(len = value.len()), level = "trace")]
    async fn push_right(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError> {
        let mut conn = self.client.conn.clone();
        let _: () = conn
            .rpush(self.client.prefixed_key(key), value)
            .await
            .map_err(|e| backend_error("RPUSH", e))?;
        trace!(key, "requeued");
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn blocking_pop_right(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ListStoreError> {
        let mut conn = self.blocking_connection(key).await?;
        // BRPOP treats 0 as "wait forever"; keep the wait bounded.
        let secs = timeout.as_secs_f64().max(0.001);
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(self.client.prefixed_key(key))
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("BRPOP", e))?;
        Ok(popped.map(|(_, value)| value))
    }
}
