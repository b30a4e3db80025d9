//! Error types for the Turnstile admission engine.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An algorithm name that does not map to a known limiter
    #[error("Unknown rate limit algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Limit parameters that no limiter can be built from
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// The state store could not be read or written
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// Per-key exclusion was not acquired within the configured budget
    #[error("Timed out after {waited_ms}ms waiting for lock on {key}")]
    LockTimeout { key: String, waited_ms: u64 },

    /// The guarded admission task did not run to completion
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether the error falls under the configured failure mode instead of
    /// being surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TurnstileError::StoreUnavailable(_) | TurnstileError::LockTimeout { .. }
        )
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
