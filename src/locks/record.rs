//! Lock record structures and utilities.

use super::liveness::is_pid_alive;
use crate::error::{LockError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata describing the current holder of a lock.
///
/// This is a snapshot of the latest successful acquisition, not a log.
/// Only the holder writes it; everybody else treats it as advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process ID of the lock holder.
    pub pid: u32,

    /// When the lock was acquired (RFC3339).
    pub acquired_at: DateTime<Utc>,

    /// Host the holder runs on.
    pub hostname: String,

    /// Identifies one acquisition; compared on release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<String>,

    /// Resource protected by the lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

impl LockRecord {
    /// Record for the calling process, timestamped now.
    pub fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            hostname: local_hostname(),
            lock_id: None,
            target: None,
        }
    }

    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Parse a lock record from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| LockError::io("read lock record", path, e))?;
        Self::from_json(path, &content)
    }

    /// Like [`LockRecord::from_file`], but a missing file yields `Ok(None)`.
    pub fn try_from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_json(path, &content).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::io("read lock record", path, e)),
        }
    }

    fn from_json(path: &Path, content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| LockError::RecordCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Serialize the record to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LockError::Config(format!("failed to serialize lock record: {}", e)))
    }

    /// Age of the lock. Negative if the holder's clock runs ahead of ours.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.acquired_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }

    /// Whether the record is older than `threshold`.
    pub fn is_stale(&self, threshold: std::time::Duration) -> bool {
        // clock skew into the future never counts as stale
        self.age().to_std().is_ok_and(|age| age > threshold)
    }

    /// Whether the holder runs on this host, so its pid can be probed.
    pub fn is_local(&self) -> bool {
        self.hostname == local_hostname()
    }

    /// Whether the holder is a local process that no longer exists.
    ///
    /// Always false for remote holders. A reused pid reads as alive.
    pub fn holder_is_gone(&self) -> bool {
        self.is_local() && !is_pid_alive(self.pid)
    }
}

/// Hostname of this machine, or "unknown".
pub(crate) fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Fresh identifier for one acquisition, unique across hosts, processes and calls.
pub(crate) fn new_lock_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{}-{}-{:x}-{}",
        local_hostname(),
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
