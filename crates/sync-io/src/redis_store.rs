//! Redis-backed [`WatermarkStore`].
//!
//! All pipelines share one hash named `state`; a pipeline's watermark
//! lives at the field named by its `watermark_key` (§4.1, §6). A single
//! `ConnectionManager` is reused across reads and writes so the store
//! reconnects transparently under the hood.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sync_core::retry::retry_connect;
use sync_core::{Result, SyncError, WatermarkStore};

const STATE_HASH_KEY: &str = "state";

pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connects, retrying indefinitely on the transient conditions the
    /// original client distinguishes: still loading the dataset into
    /// memory, refused connections, and timeouts (§5).
    pub async fn connect(&self) -> Result<ConnectionManager> {
        retry_connect("redis", is_retryable_redis_error, || async {
            let client = redis::Client::open(self.url.as_str()).map_err(anyhow::Error::from)?;
            client
                .get_connection_manager()
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }
}

fn is_retryable_redis_error(err: &anyhow::Error) -> bool {
    if let Some(redis_err) = err.downcast_ref::<redis::RedisError>() {
        return redis_err.is_connection_refusal()
            || redis_err.is_connection_dropped()
            || redis_err.is_timeout()
            || redis_err.kind() == redis::ErrorKind::BusyLoadingError;
    }
    false
}

pub struct RedisWatermarkStore {
    connection: ConnectionManager,
}

impl RedisWatermarkStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl WatermarkStore for RedisWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .hget(STATE_HASH_KEY, key)
            .await
            .map_err(|e| SyncError::Watermark(anyhow::Error::from(e)))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(STATE_HASH_KEY, key, value)
            .await
            .map_err(|e| SyncError::Watermark(anyhow::Error::from(e)))?;
        Ok(())
    }
}
