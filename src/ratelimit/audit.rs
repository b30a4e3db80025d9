//! Audit hooks invoked once per admission decision.
//!
//! Sinks are synchronous and must not block: a slow or broken sink drops
//! events rather than delaying the decision.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::decision::Decision;
use super::key::{AlgorithmKind, RateLimitKey};

/// A record of one admission decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub identity: String,
    pub algorithm: AlgorithmKind,
    pub allowed: bool,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(key: &RateLimitKey, decision: &Decision, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: key.identity.clone(),
            algorithm: key.algorithm,
            allowed: decision.allowed,
            degraded: decision.degraded,
            timestamp: DateTime::<Utc>::from_timestamp_millis(now_ms as i64).unwrap_or_default(),
        }
    }
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `turnstile::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "turnstile::audit",
            id = %event.id,
            identity = %event.identity,
            algorithm = %event.algorithm,
            allowed = event.allowed,
            degraded = event.degraded,
            timestamp = %event.timestamp.to_rfc3339(),
            "Admission decision"
        );
    }
}

/// Forwards audit events to a bounded channel for an external consumer.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "Dropping audit event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
