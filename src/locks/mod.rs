//! Locking primitives for coordinating unrelated processes.
//!
//! Two interchangeable primitives implement the [`Lock`] trait:
//! - [`ExclusiveFileLock`]: a kernel advisory lock on a regular file. The kernel
//!   drops it when the holding process dies, so crash recovery is automatic.
//! - [`MarkerDirectoryLock`]: an atomically created directory holding an
//!   `owner.json` record. Works where byte-range locks are unreliable (network
//!   filesystems) and reclaims abandoned markers by age or dead holder pid.
//!
//! # Lock Records
//!
//! Each held lock carries JSON metadata ([`LockRecord`]):
//! - `pid`: process ID of the holder
//! - `acquired_at`: RFC3339 timestamp
//! - `hostname`: host of the holder
//! - `lock_id`, `target`: marker locks only
//!
//! # Scoped Acquisition
//!
//! [`Lock::lock`] returns a [`LockGuard`] that releases on drop. Handles that
//! still own their lock also release on drop when `auto_release` is set, as a
//! backstop; correctness-sensitive callers release explicitly.
//!
//! # Named Locks
//!
//! [`LockFactory`] maps task ids, agent ids and resource paths to lock paths
//! under one base directory, so cooperating processes agree on placement.

mod factory;
mod file_lock;
mod guard;
mod liveness;
mod marker;
mod record;
mod types;
mod wait;
mod wrapper;


use crate::error::Result;
use std::path::Path;

pub use factory::{LockFactory, NamedLock};
pub use file_lock::ExclusiveFileLock;
pub use guard::LockGuard;
pub use marker::MarkerDirectoryLock;
pub use record::LockRecord;
pub use types::{LockInfo, LockKind};
pub use wrapper::{with_file_lock, with_lock};

/// Common contract of every lock handle.
///
/// At most one handle holds a given path's lock at any instant. Constructing a
/// handle has no side effects; only `acquire` creates on-disk state and only
/// `release` removes it.
pub trait Lock {
    /// Path of the on-disk lock artifact.
    fn path(&self) -> &Path;

    /// Try to take the lock.
    ///
    /// With `blocking == false`, returns `Ok(false)` at once if someone else
    /// holds it. With `blocking == true`, polls until acquired or the timeout
    /// elapses, then fails with [`LockError::Timeout`](crate::LockError::Timeout).
    /// Calling it on a handle that already owns the lock is a no-op returning
    /// `Ok(true)`.
    fn acquire(&mut self, blocking: bool) -> Result<bool>;

    /// Give the lock up. A no-op when the handle does not own it.
    fn release(&mut self) -> Result<()>;

    /// Best-effort check: whether anyone currently holds the lock.
    ///
    /// The answer may be outdated by the time it is returned.
    fn is_locked(&self) -> bool;

    /// Whether this handle holds the lock.
    fn owns_lock(&self) -> bool;

    /// Acquire (blocking, with timeout) and return a guard that releases on drop.
    fn lock(&mut self) -> Result<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        let held = self.owns_lock();
        self.acquire(true)?;
        Ok(LockGuard::new(self, !held))
    }

    /// Non-blocking variant of [`Lock::lock`]; `Ok(None)` if the lock is held elsewhere.
    fn try_lock(&mut self) -> Result<Option<LockGuard<'_, Self>>>
    where
        Self: Sized,
    {
        let held = self.owns_lock();
        if self.acquire(false)? {
            Ok(Some(LockGuard::new(self, !held)))
        } else {
            Ok(None)
        }
    }
}
