//! Tunables for the orchestration core.
//!
//! The core performs no file I/O of its own; the embedding application
//! persists `Settings` with whatever config manager it uses and hands
//! the struct in at pipeline construction. Every field has a serde
//! default so partially-specified documents load cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings structure for a pipeline instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Cancellation behavior.
    #[serde(default)]
    pub cancel: CancelSettings,

    /// Captured-output handling.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Cancellation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSettings {
    /// Seconds between graceful termination and forced kill.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for CancelSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

/// Captured-output tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Number of trailing non-empty lines carried in a failure excerpt.
    #[serde(default = "default_excerpt_lines")]
    pub excerpt_lines: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            excerpt_lines: default_excerpt_lines(),
        }
    }
}

impl Settings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.cancel.grace_period_secs)
    }
}

fn default_grace_period_secs() -> u64 {
    3
}

fn default_excerpt_lines() -> usize {
    8
}
