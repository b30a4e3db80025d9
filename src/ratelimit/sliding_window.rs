//! Sliding window log limiter.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::decision::Decision;

/// Persisted sliding window state: the log of admitted request instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    pub timestamps: VecDeque<u64>,
    pub max_requests: u64,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    max_requests: u64,
    window_ms: u64,
}

impl SlidingWindow {
    pub fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn empty_state(&self) -> SlidingWindowState {
        SlidingWindowState {
            timestamps: VecDeque::new(),
            max_requests: self.max_requests,
            window_ms: self.window_ms,
        }
    }

    pub fn reconcile(&self, mut state: SlidingWindowState) -> SlidingWindowState {
        state.max_requests = self.max_requests;
        state.window_ms = self.window_ms;
        state
    }

    /// Prune expired entries, then admit if the window has room.
    ///
    /// An entry exactly `window_ms` old is expired.
    pub fn decide(&self, state: SlidingWindowState, now: u64) -> (SlidingWindowState, Decision) {
        let mut state = self.reconcile(state);
        let window_start = now as i128 - self.window_ms as i128;
        state.timestamps.retain(|&t| t as i128 > window_start);

        let in_window = state.timestamps.len() as u64;
        let decision = if in_window < self.max_requests {
            state.timestamps.push_back(now);
            Decision::allow(self.max_requests - (in_window + 1), self.max_requests)
        } else {
            let oldest = state.timestamps.iter().copied().min().unwrap_or(now);
            let retry_after = (oldest + self.window_ms).saturating_sub(now);
            Decision::deny(retry_after, self.max_requests)
        };

        (state, decision)
    }
}
