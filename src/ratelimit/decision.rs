//! The outcome of an admission check.

use serde::Serialize;

/// An allow/deny outcome plus remaining-capacity and retry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Whole units of capacity left after this request
    pub remaining: u64,
    /// How long to wait before retrying; only set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// The configured capacity
    pub limit: u64,
    /// Set when the decision came from the failure mode instead of a limiter
    pub degraded: bool,
}

impl Decision {
    pub fn allow(remaining: u64, limit: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_ms: None,
            limit,
            degraded: false,
        }
    }

    pub fn deny(retry_after_ms: u64, limit: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_ms: Some(retry_after_ms),
            limit,
            degraded: false,
        }
    }

    pub(crate) fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_has_no_retry() {
        let decision = Decision::allow(4, 5);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.retry_after_ms, None);
    }

    #[test]
    fn test_deny_serializes_retry() {
        let decision = Decision::deny(2000, 5);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["remaining"], 0);
        assert_eq!(json["retry_after_ms"], 2000);

        let json = serde_json::to_value(Decision::allow(1, 5)).unwrap();
        assert!(json.get("retry_after_ms").is_none());
    }
}
