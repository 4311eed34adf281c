//! In-process idempotency fallback

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IdempotencyStore, StoreError};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Process-local idempotency markers with the same semantics as the redis
/// implementation, swept of expired keys periodically.
pub struct MemoryIdem {
    items: Mutex<HashMap<String, Instant>>,
}

impl MemoryIdem {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self {
            items: Mutex::new(HashMap::new()),
        });

        let sweeper = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweeper.sweep();
            }
        });

        store
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.items.lock().retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdem {
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut items = self.items.lock();

        if let Some(expires_at) = items.get(key) {
            if Instant::now() < *expires_at {
                return Ok(false);
            }
        }

        items.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_set_wins() {
        let store = MemoryIdem::new();

        assert!(store
            .set_if_not_exists("settle:m1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .set_if_not_exists("settle:m1", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let store = MemoryIdem::new();

        assert!(store
            .set_if_not_exists("settle:m1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store
            .set_if_not_exists("settle:m2", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_key_can_be_set_again() {
        let store = MemoryIdem::new();

        assert!(store
            .set_if_not_exists("settle:m1", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_if_not_exists("settle:m1", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_keys() {
        let store = MemoryIdem::new();

        store
            .set_if_not_exists("old", Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set_if_not_exists("fresh", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep();

        let items = store.items.lock();
        assert!(!items.contains_key("old"));
        assert!(items.contains_key("fresh"));
    }
}
