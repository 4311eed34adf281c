//! Idempotency store - at-most-once markers with TTL

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub use memory::MemoryIdem;
pub use redis::RedisIdem;

use crate::config::Config;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

/// At-most-once marker with TTL.
///
/// `set_if_not_exists` returns true exactly once per key within its TTL
/// window. Callers owning terminal events may treat `StoreError` as success;
/// that downgrade to at-least-once is deliberate.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Build the idempotency store from configuration.
///
/// Prefers redis when an address is configured and reachable; otherwise falls
/// back to the in-process implementation with a warning.
pub async fn connect(config: &Config) -> Arc<dyn IdempotencyStore> {
    if !config.redis_addr.is_empty() {
        match RedisIdem::connect(&config.redis_addr).await {
            Ok(store) => {
                info!(addr = %config.redis_addr, "idempotency store using redis");
                return Arc::new(store);
            }
            Err(e) => {
                warn!(addr = %config.redis_addr, error = %e, "redis unavailable, using in-memory idempotency store");
            }
        }
    }
    MemoryIdem::new()
}
