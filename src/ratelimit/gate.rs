//! The admission gate: the single entry point that mutates limiter state.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::audit::{AuditEvent, AuditSink, TracingAuditSink};
use super::clock::Clock;
use super::decision::Decision;
use super::factory::{LimitConfig, LimitState, Limiter};
use super::key::{AlgorithmKind, RateLimitKey};
use super::locks::KeyedLocks;
use super::policy::Policy;
use super::store::StateStore;
use crate::config::{AdmissionConfig, FailureMode};
use crate::error::{Result, TurnstileError};

/// Default wait for a per-key lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);
/// Lock table size above which idle entries are pruned after a check.
const DEFAULT_LOCK_PRUNE_THRESHOLD: usize = 4096;

/// Decides admission per (identity, algorithm) key.
///
/// Each check runs load, decide and save under that key's lock on a task of
/// its own, so a caller that gives up mid-check never leaves half an update
/// behind. Cloning the gate is cheap and clones share all state.
///
/// Lock table entries for idle keys are pruned once the table grows past the
/// builder's `lock_prune_threshold`.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    locks: KeyedLocks,
    lock_timeout: Duration,
    lock_prune_threshold: usize,
    failure_mode: FailureMode,
}

impl AdmissionGate {
    /// Create a gate with a tracing audit sink, fail-open behaviour and the
    /// default lock timeout.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self::builder(store, clock).build()
    }

    /// Create a gate configured from an [`AdmissionConfig`].
    pub fn from_config(
        config: &AdmissionConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::builder(store, clock)
            .lock_timeout(config.lock_timeout())
            .failure_mode(config.failure_mode)
            .build()
    }

    pub fn builder(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> AdmissionGateBuilder {
        AdmissionGateBuilder {
            store,
            clock,
            audit: Arc::new(TracingAuditSink),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_prune_threshold: DEFAULT_LOCK_PRUNE_THRESHOLD,
            failure_mode: FailureMode::default(),
        }
    }

    /// Check a request for `identity` and consume one unit if admitted.
    pub async fn check_and_consume(
        &self,
        identity: &str,
        algorithm: AlgorithmKind,
        config: &LimitConfig,
    ) -> Result<Decision> {
        self.check_and_consume_cost(identity, algorithm, config, 1).await
    }

    /// Like [`check_and_consume`](Self::check_and_consume) for a request
    /// weighing `cost` units. Only the token bucket honours the weight.
    ///
    /// `cost` must be between 1 and the configured capacity; anything else
    /// could never be admitted and fails with `InvalidLimit`.
    pub async fn check_and_consume_cost(
        &self,
        identity: &str,
        algorithm: AlgorithmKind,
        config: &LimitConfig,
        cost: u32,
    ) -> Result<Decision> {
        let limiter = Limiter::new(algorithm, config)?;
        if cost == 0 || u64::from(cost) > config.capacity {
            return Err(TurnstileError::InvalidLimit(format!(
                "cost {} must be between 1 and capacity {}",
                cost, config.capacity
            )));
        }
        let key = RateLimitKey::new(identity, algorithm);
        let slot_interval_ms = config.slot_interval_ms();

        trace!(key = %key, cost = cost, "Checking rate limit");

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.admit(key, limiter, cost, slot_interval_ms).await })
            .await
            .map_err(|e| TurnstileError::Internal(format!("admission task failed: {}", e)))?
    }

    /// Check a request against a resolved policy.
    pub async fn check(&self, identity: &str, policy: &Policy) -> Result<Decision> {
        self.check_and_consume(identity, policy.algorithm, &policy.limit())
            .await
    }

    /// Restore an identity's state for one algorithm to full availability.
    ///
    /// Keys with no state are left alone; their first check starts full.
    pub async fn reset_limit(&self, identity: &str, algorithm: AlgorithmKind) -> Result<()> {
        let key = RateLimitKey::new(identity, algorithm);
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.reset(key).await })
            .await
            .map_err(|e| TurnstileError::Internal(format!("reset task failed: {}", e)))?
    }

    /// Reset every algorithm's state for an identity.
    pub async fn reset_identity(&self, identity: &str) -> Result<()> {
        for algorithm in AlgorithmKind::ALL {
            self.reset_limit(identity, algorithm).await?;
        }
        Ok(())
    }

    /// Read the stored state without taking the key lock.
    ///
    /// The result may already be stale when it is returned.
    pub async fn snapshot(
        &self,
        identity: &str,
        algorithm: AlgorithmKind,
    ) -> Result<Option<LimitState>> {
        self.inner
            .store
            .load(&RateLimitKey::new(identity, algorithm))
            .await
    }

    /// Drop lock table entries for keys that are not in use.
    pub fn prune_idle_locks(&self) -> usize {
        self.inner.locks.prune_idle()
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.inner.failure_mode
    }
}

impl GateInner {
    async fn admit(
        &self,
        key: RateLimitKey,
        limiter: Limiter,
        cost: u32,
        slot_interval_ms: u64,
    ) -> Result<Decision> {
        let decision = match self.decide_guarded(&key, &limiter, cost).await {
            Ok(decision) => decision,
            Err(e) if e.is_transient() => self.fallback(&key, &limiter, slot_interval_ms, e),
            Err(e) => return Err(e),
        };

        if !decision.allowed {
            debug!(
                key = %key,
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
        }

        self.audit
            .record(AuditEvent::new(&key, &decision, self.clock.now_ms()));

        if self.locks.len() > self.lock_prune_threshold {
            let pruned = self.locks.prune_idle();
            trace!(pruned = pruned, "Pruned idle key locks");
        }
        Ok(decision)
    }

    async fn decide_guarded(
        &self,
        key: &RateLimitKey,
        limiter: &Limiter,
        cost: u32,
    ) -> Result<Decision> {
        let _guard = self.locks.acquire(key, self.lock_timeout).await?;

        // Read the clock only once the lock is held so that saves for a key
        // carry non-decreasing timestamps.
        let now = self.clock.now_ms();
        let state = self
            .store
            .load_or_init(key, limiter.initial_state(now))
            .await?;
        let (next, decision) = limiter.decide_with_cost(state, now, cost);
        self.store.save(key, next).await?;

        Ok(decision)
    }

    fn fallback(
        &self,
        key: &RateLimitKey,
        limiter: &Limiter,
        slot_interval_ms: u64,
        error: TurnstileError,
    ) -> Decision {
        let limit = limiter.capacity();
        match self.failure_mode {
            FailureMode::Open => {
                warn!(key = %key, error = %error, "Admission failed, admitting request");
                Decision::allow(0, limit).degraded()
            }
            FailureMode::Closed => {
                warn!(key = %key, error = %error, "Admission failed, rejecting request");
                Decision::deny(slot_interval_ms, limit).degraded()
            }
        }
    }

    async fn reset(&self, key: RateLimitKey) -> Result<()> {
        let _guard = self.locks.acquire(&key, self.lock_timeout).await?;
        let now = self.clock.now_ms();

        match self.store.load(&key).await? {
            Some(state) => {
                self.store.save(&key, state.reset(now)).await?;
                info!(key = %key, "Rate limit reset");
            }
            None => debug!(key = %key, "No rate limit state to reset"),
        }
        Ok(())
    }
}

/// Builder for [`AdmissionGate`].
pub struct AdmissionGateBuilder {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    lock_timeout: Duration,
    lock_prune_threshold: usize,
    failure_mode: FailureMode,
}

impl AdmissionGateBuilder {
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Prune idle key locks whenever the lock table holds more than
    /// `threshold` entries.
    pub fn lock_prune_threshold(mut self, threshold: usize) -> Self {
        self.lock_prune_threshold = threshold;
        self
    }

    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn build(self) -> AdmissionGate {
        AdmissionGate {
            inner: Arc::new(GateInner {
                store: self.store,
                clock: self.clock,
                audit: self.audit,
                locks: KeyedLocks::new(),
                lock_timeout: self.lock_timeout,
                lock_prune_threshold: self.lock_prune_threshold,
                failure_mode: self.failure_mode,
            }),
        }
    }
}
