//! LockConfig struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Settings shared by lock handles.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum time a blocking acquire waits, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sleep between acquisition attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Age after which a marker directory lock is presumed abandoned, in seconds.
    ///
    /// Independent of `timeout_ms`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Release a still-owned lock when its handle is dropped.
    #[serde(default = "default_true")]
    pub auto_release: bool,

    /// Primitive handed out by a `LockFactory`.
    #[serde(default)]
    pub strategy: LockStrategy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            auto_release: default_true(),
            strategy: LockStrategy::default(),
        }
    }
}
