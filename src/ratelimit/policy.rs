//! Rate limit policy configuration and lookup.
//!
//! A policy table holds one default policy plus per-identity overrides.
//! Lookup is exact on the identity string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::factory::LimitConfig;
use super::key::AlgorithmKind;
use crate::error::{Result, TurnstileError};

/// Which algorithm to apply and with what limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_algorithm")]
    pub algorithm: AlgorithmKind,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            capacity: default_capacity(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_algorithm() -> AlgorithmKind {
    AlgorithmKind::TokenBucket
}

fn default_capacity() -> u64 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

impl Policy {
    pub fn new(algorithm: AlgorithmKind, capacity: u64, window_ms: u64) -> Self {
        Self {
            algorithm,
            capacity,
            window_ms,
        }
    }

    pub fn limit(&self) -> LimitConfig {
        LimitConfig::new(self.capacity, self.window_ms)
    }
}

/// An identity-specific policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityPolicy {
    pub identity: String,
    #[serde(flatten)]
    pub policy: Policy,
}

/// The default policy plus overrides for individual identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub default: Policy,
    #[serde(default)]
    pub identities: Vec<IdentityPolicy>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl PolicyTable {
    /// A table with only a default policy.
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse policies: {}", e)))?;
        table.prepared()
    }

    /// Validate every policy and build the identity index.
    ///
    /// Tables produced by deserialization must pass through here before
    /// [`resolve`](Self::resolve) sees their overrides.
    pub fn prepared(mut self) -> Result<Self> {
        self.default
            .limit()
            .validate()
            .map_err(|e| TurnstileError::Config(format!("default policy: {}", e)))?;

        self.index.clear();
        for (position, entry) in self.identities.iter().enumerate() {
            entry.policy.limit().validate().map_err(|e| {
                TurnstileError::Config(format!("policy for '{}': {}", entry.identity, e))
            })?;
            if self.index.insert(entry.identity.clone(), position).is_some() {
                return Err(TurnstileError::Config(format!(
                    "duplicate policy for identity '{}'",
                    entry.identity
                )));
            }
        }
        Ok(self)
    }

    /// Add or replace the override for an identity.
    pub fn set_override(&mut self, identity: &str, policy: Policy) -> Result<()> {
        policy.limit().validate()?;
        match self.index.get(identity) {
            Some(&position) => self.identities[position].policy = policy,
            None => {
                self.index.insert(identity.to_string(), self.identities.len());
                self.identities.push(IdentityPolicy {
                    identity: identity.to_string(),
                    policy,
                });
            }
        }
        Ok(())
    }

    /// The policy that applies to `identity`.
    pub fn resolve(&self, identity: &str) -> &Policy {
        self.index
            .get(identity)
            .map(|&position| &self.identities[position].policy)
            .unwrap_or(&self.default)
    }
}
