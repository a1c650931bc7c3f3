//! Run a closure while holding a lock.

use super::Lock;
use super::file_lock::ExclusiveFileLock;
use crate::config::LockConfig;
use crate::error::LockError;
use std::path::PathBuf;
use tracing::warn;

/// Run `f` while holding `lock`.
///
/// Acquisition blocks up to the lock's timeout. The lock is released on every
/// exit path, including a panic in `f`. If both `f` and the release fail, the
/// error from `f` is returned and the release failure is logged.
///
/// When `lock` already owns the lock on entry, the call nests: `f` runs and
/// the outer acquisition stays in place afterwards.
pub fn with_lock<L, T, E, F>(lock: &mut L, f: F) -> Result<T, E>
where
    L: Lock,
    E: From<LockError>,
    F: FnOnce() -> Result<T, E>,
{
    let guard = lock.lock()?;

    match f() {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(release_err) = guard.release() {
                warn!(
                    path = %lock.path().display(),
                    error = %release_err,
                    "failed to release lock after guarded operation failed"
                );
            }
            Err(e)
        }
    }
}

/// Run `f` while holding an [`ExclusiveFileLock`] on `lock_path`.
pub fn with_file_lock<T, E, F>(
    lock_path: impl Into<PathBuf>,
    config: &LockConfig,
    f: F,
) -> Result<T, E>
where
    E: From<LockError>,
    F: FnOnce() -> Result<T, E>,
{
    let mut lock = ExclusiveFileLock::new(lock_path, config);
    with_lock(&mut lock, f)
}
