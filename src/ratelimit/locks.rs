//! Per-key mutual exclusion.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::key::RateLimitKey;
use crate::error::{Result, TurnstileError};

/// A table of async mutexes, one per rate limit key.
///
/// Holding the guard returned by [`acquire`](Self::acquire) gives exclusive
/// access to that key's state; other keys are unaffected.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<RateLimitKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for exclusive access to `key`.
    pub async fn acquire(&self, key: &RateLimitKey, timeout: Duration) -> Result<OwnedMutexGuard<()>> {
        // Clone the mutex out so the map shard is not held across the await.
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                trace!(key = %key, "Acquired key lock");
                Ok(guard)
            }
            Err(_) => Err(TurnstileError::LockTimeout {
                key: key.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Remove locks nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
