use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared store for rate-limit bookkeeping.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically record a hit for `key`. Returns `false` if the key was
    /// already hit within `period`; concurrent callers never both pass.
    async fn check_and_set(&self, key: &str, period: Duration) -> bool;
}

/// Single-process store; expired keys are pruned as they are touched.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    hits: Mutex<HashMap<String, Instant>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.hits.lock().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_set(&self, key: &str, period: Duration) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        hits.retain(|_, expires| *expires > now);

        if hits.contains_key(key) {
            return false;
        }
        hits.insert(key.to_string(), now + period);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn key_is_blocked_until_period_elapses() {
        let store = MemoryRateLimitStore::new();
        let period = Duration::from_secs(10);

        assert!(store.check_and_set("ratelimit:alice", period).await);
        assert!(!store.check_and_set("ratelimit:alice", period).await);
        assert!(store.check_and_set("ratelimit:bob", period).await);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.check_and_set("ratelimit:alice", period).await);
    }
}
