//! Configuration enums and default value functions used by `LockConfig`.

use serde::{Deserialize, Serialize};

/// Which on-disk primitive a lock factory hands out.
///
/// A coordination domain must stick to one strategy: a file lock and a marker
/// directory lock on the same resource do not exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// Kernel advisory lock on a regular file (default).
    #[default]
    File,
    /// Atomically created marker directory with staleness reclamation.
    Marker,
}

impl LockStrategy {
    /// Parse a strategy from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "marker" => Some(Self::Marker),
            _ => None,
        }
    }

    /// File extension used for artifacts of this strategy.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::File => "lock",
            Self::Marker => "lockdir",
        }
    }
}

pub(crate) fn default_timeout_ms() -> u64 {
    10_000
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    100
}

pub(crate) fn default_stale_after_secs() -> u64 {
    300
}

pub(crate) fn default_true() -> bool {
    true
}
