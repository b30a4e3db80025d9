//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::PolicyTable;

/// Prefix for environment overrides, e.g. `TURNSTILE__ADMISSION__FAILURE_MODE=closed`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Admission gate configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Rate limit policies
    #[serde(default)]
    pub policies: PolicyTable,
}

/// What the gate answers when the store or the key lock is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request
    #[default]
    Open,
    /// Reject the request
    Closed,
}

/// Admission gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Longest wait for a per-key lock, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Policy for store and lock failures
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl AdmissionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn default_lock_timeout_ms() -> u64 {
    250
}

impl TurnstileConfig {
    /// Load configuration from a file path, with `TURNSTILE__*` environment
    /// variables layered on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(TurnstileError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: TurnstileConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.prepared()
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.prepared()
    }

    fn prepared(mut self) -> Result<Self> {
        if self.admission.lock_timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "admission.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.policies = self.policies.prepared()?;
        Ok(self)
    }
}
