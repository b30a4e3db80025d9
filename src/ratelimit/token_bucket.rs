//! Token bucket limiter.
//!
//! Tokens refill continuously at `capacity / window` per second up to
//! `capacity`; each admitted request consumes `cost` tokens.

use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// Persisted token bucket state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub capacity: u64,
    pub refill_rate_per_sec: f64,
    /// Millisecond timestamp the refill was last computed from
    pub last_refill: u64,
}

/// Token bucket parameters derived from a limit configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    capacity: u64,
    refill_rate_per_sec: f64,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_rate_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_sec,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate_per_sec(&self) -> f64 {
        self.refill_rate_per_sec
    }

    /// A full bucket anchored at `now`.
    pub fn full_state(&self, now: u64) -> TokenBucketState {
        TokenBucketState {
            tokens: self.capacity as f64,
            capacity: self.capacity,
            refill_rate_per_sec: self.refill_rate_per_sec,
            last_refill: now,
        }
    }

    /// Bring a persisted state in line with these parameters.
    pub fn reconcile(&self, mut state: TokenBucketState) -> TokenBucketState {
        state.capacity = self.capacity;
        state.refill_rate_per_sec = self.refill_rate_per_sec;
        state.tokens = state.tokens.clamp(0.0, self.capacity as f64);
        state
    }

    /// Refill, then try to take `cost` tokens.
    ///
    /// The refreshed token count is persisted with the anchor moved to `now`
    /// on both outcomes, so elapsed time is never counted twice.
    pub fn decide(
        &self,
        state: TokenBucketState,
        now: u64,
        cost: u32,
    ) -> (TokenBucketState, Decision) {
        let state = self.reconcile(state);
        let capacity = self.capacity as f64;
        let cost = cost as f64;

        let elapsed_secs = now.saturating_sub(state.last_refill) as f64 / 1000.0;
        let mut tokens = (state.tokens + elapsed_secs * self.refill_rate_per_sec).min(capacity);

        let decision = if tokens >= cost {
            tokens -= cost;
            Decision::allow(tokens.floor() as u64, self.capacity)
        } else {
            let retry_after = ((cost - tokens) / self.refill_rate_per_sec * 1000.0).ceil();
            Decision::deny(retry_after as u64, self.capacity)
        };

        let next = TokenBucketState {
            tokens: tokens.max(0.0),
            last_refill: now,
            ..state
        };
        (next, decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u64, window_ms: u64) -> TokenBucket {
        TokenBucket::new(capacity, capacity as f64 / (window_ms as f64 / 1000.0))
    }

    #[test]
    fn test_drains_then_denies() {
        let limiter = bucket(5, 10_000);
        let mut state = limiter.full_state(0);

        for expected in [4, 3, 2, 1, 0] {
            let (next, decision) = limiter.decide(state, 0, 1);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
            state = next;
        }

        let (_, decision) = limiter.decide(state, 0, 1);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_ms, Some(2000));
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = bucket(2, 2_000);
        let mut state = limiter.full_state(0);
        for _ in 0..2 {
            state = limiter.decide(state, 0, 1).0;
        }

        // 1 token per second
        let (state, decision) = limiter.decide(state, 500, 1);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_ms, Some(500));

        let (_, decision) = limiter.decide(state, 1_000, 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_denial_advances_anchor_without_losing_tokens() {
        let limiter = bucket(1, 1_000);
        let (state, _) = limiter.decide(limiter.full_state(0), 0, 1);

        let (state, decision) = limiter.decide(state, 500, 1);
        assert!(!decision.allowed);
        assert_eq!(state.last_refill, 500);
        assert!((state.tokens - 0.5).abs() < 1e-9);

        let (state, decision) = limiter.decide(state, 1_000, 1);
        assert!(decision.allowed);
        assert!(state.tokens.abs() < 1e-9);
    }

    #[test]
    fn test_multi_token_cost() {
        let limiter = bucket(10, 10_000);
        let (state, decision) = limiter.decide(limiter.full_state(0), 0, 7);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);

        let (_, decision) = limiter.decide(state, 0, 4);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_ms, Some(1000));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let limiter = bucket(3, 3_000);
        let (state, _) = limiter.decide(limiter.full_state(0), 0, 1);
        let (state, decision) = limiter.decide(state, 3_600_000, 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert!((state.tokens - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tokens_conserved_for_any_sequence() {
        let limiter = bucket(4, 1_000);
        let mut state = limiter.full_state(0);
        let mut now = 0;
        let steps = [0, 1, 7, 250, 0, 0, 3, 999, 5_000, 0, 12, 125, 0, 0, 0, 40];
        let costs = [1, 2, 1, 3, 4, 1, 5, 1, 2, 1, 1, 3, 1, 2, 1, 1];

        for (step, cost) in steps.iter().zip(costs.iter()) {
            now += step;
            let (next, _) = limiter.decide(state, now, *cost);
            assert!(next.tokens >= 0.0, "tokens went negative: {}", next.tokens);
            assert!(next.tokens <= 4.0, "tokens exceeded capacity: {}", next.tokens);
            state = next;
        }
    }

    #[test]
    fn test_reconcile_clamps_to_new_capacity() {
        let old = bucket(10, 1_000);
        let state = old.full_state(0);

        let new = bucket(3, 1_000);
        let reconciled = new.reconcile(state);
        assert_eq!(reconciled.capacity, 3);
        assert_eq!(reconciled.tokens, 3.0);
        assert_eq!(reconciled.refill_rate_per_sec, 3.0);
    }
}
