//! Lock kind definitions and information structures.

use super::record::LockRecord;
use std::path::PathBuf;

/// Kind of logical resource a named lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Per-task lock (`task-<id>`).
    Task,
    /// Per-agent lock (`agent-<id>`).
    Agent,
    /// Lock on an arbitrary file or directory path (`resource-<path>`).
    Resource,
}

impl LockKind {
    /// Prefix used in lock artifact names.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Task => "task",
            LockKind::Agent => "agent",
            LockKind::Resource => "resource",
        }
    }

    /// Parse a prefix back into a kind.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "task" => Some(LockKind::Task),
            "agent" => Some(LockKind::Agent),
            "resource" => Some(LockKind::Resource),
            _ => None,
        }
    }
}

/// Information about a lock artifact found under a factory's base directory.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock artifact path.
    pub path: PathBuf,

    /// The lock name (e.g., "task-T-1", "agent-builder").
    pub name: String,

    /// The lock kind.
    pub kind: LockKind,

    /// The holder's record, if it could be read.
    pub record: Option<LockRecord>,

    /// Whether nobody is really holding the lock anymore.
    pub is_stale: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(record) => write!(
                f,
                "{} (pid: {}, host: {}, age: {}{})",
                self.name,
                record.pid,
                record.hostname,
                record.age_string(),
                if self.is_stale { ", STALE" } else { "" }
            ),
            None => write!(
                f,
                "{} (no record{})",
                self.name,
                if self.is_stale { ", STALE" } else { "" }
            ),
        }
    }
}
