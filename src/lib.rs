//! Turnstile - Per-Identity Request Admission
//!
//! This crate decides, per identity, whether an incoming request is admitted.
//! It offers token bucket, sliding window and leaky bucket limiters behind a
//! single admission gate that serializes updates per (identity, algorithm)
//! key, so concurrent requests never spend the same capacity twice.

pub mod config;
pub mod error;
pub mod ratelimit;
