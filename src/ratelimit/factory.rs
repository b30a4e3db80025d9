//! Limiter construction and dispatch.
//!
//! The algorithm set is closed, so limiters and their persisted state are
//! plain enums dispatched by `match`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::decision::Decision;
use super::key::AlgorithmKind;
use super::leaky_bucket::{LeakyBucket, LeakyBucketState};
use super::sliding_window::{SlidingWindow, SlidingWindowState};
use super::token_bucket::{TokenBucket, TokenBucketState};
use crate::error::{Result, TurnstileError};

/// Capacity and window a limiter is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Requests (or tokens) allowed per window
    pub capacity: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitConfig {
    pub fn new(capacity: u64, window_ms: u64) -> Self {
        Self {
            capacity,
            window_ms,
        }
    }

    /// Units restored (token bucket) or drained (leaky bucket) per second.
    pub fn rate_per_sec(&self) -> f64 {
        self.capacity as f64 / (self.window_ms as f64 / 1000.0)
    }

    /// Time for one unit to refill or drain, rounded up.
    pub fn slot_interval_ms(&self) -> u64 {
        self.window_ms.div_ceil(self.capacity.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(TurnstileError::InvalidLimit(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TurnstileError::InvalidLimit(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mutable per-key state as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimitState {
    TokenBucket(TokenBucketState),
    SlidingWindow(SlidingWindowState),
    LeakyBucket(LeakyBucketState),
}

impl LimitState {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            LimitState::TokenBucket(_) => AlgorithmKind::TokenBucket,
            LimitState::SlidingWindow(_) => AlgorithmKind::SlidingWindow,
            LimitState::LeakyBucket(_) => AlgorithmKind::LeakyBucket,
        }
    }

    /// The same parameters restored to full availability, anchored at `now`.
    pub fn reset(&self, now: u64) -> LimitState {
        match self {
            LimitState::TokenBucket(s) => LimitState::TokenBucket(TokenBucketState {
                tokens: s.capacity as f64,
                last_refill: now,
                ..s.clone()
            }),
            LimitState::SlidingWindow(s) => LimitState::SlidingWindow(SlidingWindowState {
                timestamps: Default::default(),
                ..s.clone()
            }),
            LimitState::LeakyBucket(s) => LimitState::LeakyBucket(LeakyBucketState {
                queue_size: 0.0,
                last_leak: now,
                ..s.clone()
            }),
        }
    }
}

/// A limiter with its derived parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
    LeakyBucket(LeakyBucket),
}

impl Limiter {
    /// Build the limiter for `kind` from a capacity and window.
    pub fn new(kind: AlgorithmKind, config: &LimitConfig) -> Result<Self> {
        config.validate()?;
        let limiter = match kind {
            AlgorithmKind::TokenBucket => {
                Limiter::TokenBucket(TokenBucket::new(config.capacity, config.rate_per_sec()))
            }
            AlgorithmKind::SlidingWindow => {
                Limiter::SlidingWindow(SlidingWindow::new(config.capacity, config.window_ms))
            }
            AlgorithmKind::LeakyBucket => {
                Limiter::LeakyBucket(LeakyBucket::new(config.capacity, config.rate_per_sec()))
            }
        };
        Ok(limiter)
    }

    /// Build a limiter from an algorithm name.
    pub fn from_name(name: &str, config: &LimitConfig) -> Result<Self> {
        Self::new(name.parse()?, config)
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Limiter::TokenBucket(_) => AlgorithmKind::TokenBucket,
            Limiter::SlidingWindow(_) => AlgorithmKind::SlidingWindow,
            Limiter::LeakyBucket(_) => AlgorithmKind::LeakyBucket,
        }
    }

    pub fn capacity(&self) -> u64 {
        match self {
            Limiter::TokenBucket(b) => b.capacity(),
            Limiter::SlidingWindow(w) => w.max_requests(),
            Limiter::LeakyBucket(b) => b.capacity(),
        }
    }

    /// Full-availability state for a key seen for the first time.
    pub fn initial_state(&self, now: u64) -> LimitState {
        match self {
            Limiter::TokenBucket(b) => LimitState::TokenBucket(b.full_state(now)),
            Limiter::SlidingWindow(w) => LimitState::SlidingWindow(w.empty_state()),
            Limiter::LeakyBucket(b) => LimitState::LeakyBucket(b.empty_state(now)),
        }
    }

    /// Decide a single request of unit cost.
    pub fn decide(&self, state: LimitState, now: u64) -> (LimitState, Decision) {
        self.decide_with_cost(state, now, 1)
    }

    /// Decide a request of `cost` units.
    ///
    /// Only the token bucket weighs requests; the window and queue count
    /// each request as one.
    pub fn decide_with_cost(&self, state: LimitState, now: u64, cost: u32) -> (LimitState, Decision) {
        match (self, state) {
            (Limiter::TokenBucket(b), LimitState::TokenBucket(s)) => {
                let (next, decision) = b.decide(s, now, cost);
                (LimitState::TokenBucket(next), decision)
            }
            (Limiter::SlidingWindow(w), LimitState::SlidingWindow(s)) => {
                let (next, decision) = w.decide(s, now);
                (LimitState::SlidingWindow(next), decision)
            }
            (Limiter::LeakyBucket(b), LimitState::LeakyBucket(s)) => {
                let (next, decision) = b.decide(s, now);
                (LimitState::LeakyBucket(next), decision)
            }
            (limiter, state) => {
                warn!(
                    limiter = %limiter.kind(),
                    state = %state.kind(),
                    "Stored state does not match limiter, starting fresh"
                );
                limiter.decide_with_cost(limiter.initial_state(now), now, cost)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_rates() {
        let config = LimitConfig::new(5, 10_000);
        assert_eq!(config.rate_per_sec(), 0.5);

        match Limiter::new(AlgorithmKind::TokenBucket, &config).unwrap() {
            Limiter::TokenBucket(b) => assert_eq!(b.refill_rate_per_sec(), 0.5),
            other => panic!("unexpected limiter {:?}", other),
        }

        let config = LimitConfig::new(3, 3_000);
        match Limiter::new(AlgorithmKind::LeakyBucket, &config).unwrap() {
            Limiter::LeakyBucket(b) => assert_eq!(b.leak_rate_per_sec(), 1.0),
            other => panic!("unexpected limiter {:?}", other),
        }
    }

    #[test]
    fn test_from_name() {
        let config = LimitConfig::new(2, 1_000);
        let limiter = Limiter::from_name("SLIDING_WINDOW", &config).unwrap();
        assert_eq!(limiter.kind(), AlgorithmKind::SlidingWindow);
        assert_eq!(limiter.capacity(), 2);

        let err = Limiter::from_name("fixed_window", &config).unwrap_err();
        assert!(matches!(err, TurnstileError::UnknownAlgorithm(_)));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        for config in [LimitConfig::new(0, 1_000), LimitConfig::new(10, 0)] {
            let err = Limiter::new(AlgorithmKind::TokenBucket, &config).unwrap_err();
            assert!(matches!(err, TurnstileError::InvalidLimit(_)));
        }
    }

    #[test]
    fn test_first_request_consumes_one_slot() {
        let config = LimitConfig::new(4, 1_000);
        for kind in AlgorithmKind::ALL {
            let limiter = Limiter::new(kind, &config).unwrap();
            let (_, decision) = limiter.decide(limiter.initial_state(1_000), 1_000);
            assert!(decision.allowed, "{} should admit the first request", kind);
            assert_eq!(decision.remaining, 3, "{}", kind);
            assert_eq!(decision.limit, 4);
        }
    }

    #[test]
    fn test_mismatched_state_starts_fresh() {
        let config = LimitConfig::new(2, 1_000);
        let bucket = Limiter::new(AlgorithmKind::TokenBucket, &config).unwrap();
        let window = Limiter::new(AlgorithmKind::SlidingWindow, &config).unwrap();

        let (state, decision) = window.decide(bucket.initial_state(0), 0);
        assert!(decision.allowed);
        assert_eq!(state.kind(), AlgorithmKind::SlidingWindow);
    }

    #[test]
    fn test_reset_restores_own_fields() {
        let config = LimitConfig::new(2, 1_000);
        for kind in AlgorithmKind::ALL {
            let limiter = Limiter::new(kind, &config).unwrap();
            let mut state = limiter.initial_state(0);
            for _ in 0..3 {
                state = limiter.decide(state, 10).0;
            }

            let reset = state.reset(20);
            assert_eq!(reset.kind(), kind);
            assert_eq!(reset, limiter.initial_state(20).reset(20));

            let (_, decision) = limiter.decide(reset, 20);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
    }

    #[test]
    fn test_slot_interval() {
        assert_eq!(LimitConfig::new(5, 10_000).slot_interval_ms(), 2_000);
        assert_eq!(LimitConfig::new(3, 1_000).slot_interval_ms(), 334);
    }

    #[test]
    fn test_state_serde_is_tagged() {
        let limiter = Limiter::new(AlgorithmKind::LeakyBucket, &LimitConfig::new(3, 3_000)).unwrap();
        let json = serde_json::to_value(limiter.initial_state(42)).unwrap();
        assert_eq!(json["algorithm"], "leaky_bucket");
        assert_eq!(json["last_leak"], 42);
    }
}
