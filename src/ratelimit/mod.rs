//! Rate limiting algorithms, state management and the admission gate.

mod audit;
mod clock;
mod decision;
mod factory;
mod gate;
mod key;
mod leaky_bucket;
mod locks;
mod policy;
mod sliding_window;
mod store;
mod token_bucket;

pub use audit::{AuditEvent, AuditSink, ChannelAuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::Decision;
pub use factory::{LimitConfig, LimitState, Limiter};
pub use gate::{AdmissionGate, AdmissionGateBuilder};
pub use key::{AlgorithmKind, RateLimitKey};
pub use leaky_bucket::{LeakyBucket, LeakyBucketState};
pub use locks::KeyedLocks;
pub use policy::{IdentityPolicy, Policy, PolicyTable};
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use store::{MemoryStore, StateStore};
pub use token_bucket::{TokenBucket, TokenBucketState};
