//! Leaky bucket limiter.
//!
//! Every admitted request adds one unit to the queue, which drains at
//! `capacity / window` units per second.

use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// Persisted leaky bucket state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketState {
    pub queue_size: f64,
    pub capacity: u64,
    pub leak_rate_per_sec: f64,
    pub last_leak: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyBucket {
    capacity: u64,
    leak_rate_per_sec: f64,
}

impl LeakyBucket {
    pub fn new(capacity: u64, leak_rate_per_sec: f64) -> Self {
        Self {
            capacity,
            leak_rate_per_sec,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn leak_rate_per_sec(&self) -> f64 {
        self.leak_rate_per_sec
    }

    /// An empty queue anchored at `now`.
    pub fn empty_state(&self, now: u64) -> LeakyBucketState {
        LeakyBucketState {
            queue_size: 0.0,
            capacity: self.capacity,
            leak_rate_per_sec: self.leak_rate_per_sec,
            last_leak: now,
        }
    }

    pub fn reconcile(&self, mut state: LeakyBucketState) -> LeakyBucketState {
        state.capacity = self.capacity;
        state.leak_rate_per_sec = self.leak_rate_per_sec;
        state.queue_size = state.queue_size.clamp(0.0, self.capacity as f64);
        state
    }

    /// Drain the queue for the elapsed time, then enqueue if a whole unit
    /// still fits under `capacity`.
    ///
    /// The decayed queue and the `now` anchor are persisted on denial too.
    pub fn decide(&self, state: LeakyBucketState, now: u64) -> (LeakyBucketState, Decision) {
        let state = self.reconcile(state);
        let capacity = self.capacity as f64;

        let elapsed_secs = now.saturating_sub(state.last_leak) as f64 / 1000.0;
        let mut queue_size = (state.queue_size - elapsed_secs * self.leak_rate_per_sec).max(0.0);

        let decision = if queue_size + 1.0 <= capacity {
            queue_size += 1.0;
            Decision::allow((capacity - queue_size).floor() as u64, self.capacity)
        } else {
            let excess = queue_size - capacity + 1.0;
            let retry_after = (excess / self.leak_rate_per_sec * 1000.0).ceil();
            Decision::deny(retry_after as u64, self.capacity)
        };

        let next = LeakyBucketState {
            queue_size,
            last_leak: now,
            ..state
        };
        (next, decision)
    }
}
