//! Rate limit key generation and algorithm kinds.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::TurnstileError;

/// The closed set of admission algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum AlgorithmKind {
    TokenBucket,
    SlidingWindow,
    LeakyBucket,
}

impl AlgorithmKind {
    /// Every algorithm kind, in declaration order.
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::TokenBucket,
        AlgorithmKind::SlidingWindow,
        AlgorithmKind::LeakyBucket,
    ];

    /// The canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::LeakyBucket => "leaky_bucket",
        }
    }
}

impl FromStr for AlgorithmKind {
    type Err = TurnstileError;

    /// Accepts `token_bucket`, `TOKEN_BUCKET` and `token-bucket` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            "sliding_window" => Ok(AlgorithmKind::SlidingWindow),
            "leaky_bucket" => Ok(AlgorithmKind::LeakyBucket),
            _ => Err(TurnstileError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for AlgorithmKind {
    type Error = TurnstileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmKind> for &'static str {
    fn from(kind: AlgorithmKind) -> Self {
        kind.as_str()
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that uniquely identifies one piece of rate limit state.
///
/// An identity may hold state for several algorithm kinds at once; each
/// (identity, algorithm) pair is tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Opaque caller-supplied identity, e.g. a user id
    pub identity: String,
    /// The algorithm this state belongs to
    pub algorithm: AlgorithmKind,
}

impl RateLimitKey {
    /// Create a new key for an identity and algorithm.
    pub fn new(identity: &str, algorithm: AlgorithmKind) -> Self {
        Self {
            identity: identity.to_string(),
            algorithm,
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.identity, self.algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm_spellings() {
        assert_eq!(
            "token_bucket".parse::<AlgorithmKind>().unwrap(),
            AlgorithmKind::TokenBucket
        );
        assert_eq!(
            "SLIDING_WINDOW".parse::<AlgorithmKind>().unwrap(),
            AlgorithmKind::SlidingWindow
        );
        assert_eq!(
            "leaky-bucket".parse::<AlgorithmKind>().unwrap(),
            AlgorithmKind::LeakyBucket
        );
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let err = "fixed_window".parse::<AlgorithmKind>().unwrap_err();
        assert!(matches!(err, TurnstileError::UnknownAlgorithm(name) if name == "fixed_window"));
    }

    #[test]
    fn test_algorithm_serde() {
        let kind: AlgorithmKind = serde_yaml::from_str("TOKEN_BUCKET").unwrap();
        assert_eq!(kind, AlgorithmKind::TokenBucket);
        assert_eq!(
            serde_json::to_string(&AlgorithmKind::LeakyBucket).unwrap(),
            "\"leaky_bucket\""
        );
        assert!(serde_yaml::from_str::<AlgorithmKind>("round_robin").is_err());
    }

    #[test]
    fn test_key_display() {
        let key = RateLimitKey::new("user-42", AlgorithmKind::SlidingWindow);
        assert_eq!(key.to_string(), "user-42:sliding_window");
    }

    #[test]
    fn test_key_equality() {
        let key1 = RateLimitKey::new("alice", AlgorithmKind::TokenBucket);
        let key2 = RateLimitKey::new("alice", AlgorithmKind::TokenBucket);
        let key3 = RateLimitKey::new("alice", AlgorithmKind::LeakyBucket);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }
}
