//! Rate limit state storage.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::factory::LimitState;
use super::key::RateLimitKey;
use crate::error::Result;

/// Storage for per-key limiter state.
///
/// Implementations map any I/O failure to
/// [`TurnstileError::StoreUnavailable`](crate::error::TurnstileError::StoreUnavailable).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Return the stored state for `key`, inserting `init` if there is none.
    ///
    /// Creation must happen at most once per key: when two callers race on an
    /// absent key, both observe the same record.
    async fn load_or_init(&self, key: &RateLimitKey, init: LimitState) -> Result<LimitState>;

    /// Replace the stored state for `key`.
    async fn save(&self, key: &RateLimitKey, state: LimitState) -> Result<()>;

    /// Read the stored state without creating it.
    async fn load(&self, key: &RateLimitKey) -> Result<Option<LimitState>>;
}

/// In-process state store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: DashMap<RateLimitKey, LimitState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with stored state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.states.clear();
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_or_init(&self, key: &RateLimitKey, init: LimitState) -> Result<LimitState> {
        let entry = self.states.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating rate limit state");
            init
        });
        Ok(entry.value().clone())
    }

    async fn save(&self, key: &RateLimitKey, state: LimitState) -> Result<()> {
        self.states.insert(key.clone(), state);
        Ok(())
    }

    async fn load(&self, key: &RateLimitKey) -> Result<Option<LimitState>> {
        Ok(self.states.get(key).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::factory::{LimitConfig, Limiter};
    use crate::ratelimit::key::AlgorithmKind;
    use std::sync::Arc;

    fn limiter(kind: AlgorithmKind) -> Limiter {
        Limiter::new(kind, &LimitConfig::new(10, 1_000)).unwrap()
    }

    #[tokio::test]
    async fn test_load_or_init_creates_once() {
        let store = MemoryStore::new();
        let key = RateLimitKey::new("alice", AlgorithmKind::TokenBucket);
        let limiter = limiter(AlgorithmKind::TokenBucket);

        let first = store.load_or_init(&key, limiter.initial_state(100)).await.unwrap();
        let second = store.load_or_init(&key, limiter.initial_state(200)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_state() {
        let store = MemoryStore::new();
        let key = RateLimitKey::new("bob", AlgorithmKind::LeakyBucket);
        let limiter = limiter(AlgorithmKind::LeakyBucket);

        let state = store.load_or_init(&key, limiter.initial_state(0)).await.unwrap();
        let (next, _) = limiter.decide(state, 0);
        store.save(&key, next.clone()).await.unwrap();

        assert_eq!(store.load(&key).await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let store = MemoryStore::new();
        let key = RateLimitKey::new("nobody", AlgorithmKind::SlidingWindow);
        assert_eq!(store.load(&key).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_kinds_stored_separately() {
        let store = MemoryStore::new();
        for kind in AlgorithmKind::ALL {
            let key = RateLimitKey::new("carol", kind);
            store.load_or_init(&key, limiter(kind).initial_state(0)).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_share_record() {
        let store = Arc::new(MemoryStore::new());
        let key = RateLimitKey::new("dave", AlgorithmKind::TokenBucket);
        let limiter = limiter(AlgorithmKind::TokenBucket);

        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    store.load_or_init(&key, limiter.initial_state(i)).await.unwrap()
                })
            })
            .collect();

        let states = futures::future::join_all(handles).await;
        let first = states[0].as_ref().unwrap().clone();
        for state in states {
            assert_eq!(state.unwrap(), first);
        }
    }
}
