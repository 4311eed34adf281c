//! Redis-backed idempotency markers (SET NX PX)

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{IdempotencyStore, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisIdem {
    conn: MultiplexedConnection,
}

impl RedisIdem {
    /// Connect and verify the server responds to PING
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{}", addr))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Unavailable("connect timeout".to_string()))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdem {
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();

        // SET key 1 NX PX <ttl> answers OK on first write, nil afterwards.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(reply.is_some())
    }
}
