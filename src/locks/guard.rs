//! RAII guard for scoped acquisition.

use super::Lock;
use crate::error::Result;
use std::path::Path;

/// Holds a lock for the duration of a scope.
///
/// Dropping the guard releases the lock on every exit path, including early
/// returns and panics. If the release fails during drop, a warning is logged
/// but no panic occurs; call [`LockGuard::release`] to observe the error.
///
/// A guard taken on a handle that already held the lock does not own that
/// acquisition: it leaves the lock held when it goes away, so nested scopes
/// never release an outer one.
#[derive(Debug)]
pub struct LockGuard<'a, L: Lock> {
    lock: &'a mut L,

    /// Whether this guard performed the acquisition.
    took: bool,

    /// Whether the lock has been released manually.
    released: bool,
}

impl<'a, L: Lock> LockGuard<'a, L> {
    /// Wrap a lock the caller has already acquired.
    ///
    /// `took` is false when the handle held the lock before this guard existed.
    pub(crate) fn new(lock: &'a mut L, took: bool) -> Self {
        Self {
            lock,
            took,
            released: false,
        }
    }

    /// Path of the lock artifact.
    pub fn path(&self) -> &Path {
        self.lock.path()
    }

    /// The guarded handle.
    pub fn handle(&self) -> &L {
        &*self.lock
    }

    /// Mutable access to the guarded handle, e.g. for a nested scope.
    pub fn handle_mut(&mut self) -> &mut L {
        self.lock
    }

    /// Whether dropping this guard releases the lock.
    pub fn is_outermost(&self) -> bool {
        self.took
    }

    /// Release the lock before the guard goes out of scope and observe errors.
    ///
    /// A no-op for a nested guard; the outer holder keeps the lock.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.took {
            return Ok(());
        }
        self.lock.release()
    }
}

impl<L: Lock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if self.took
            && !self.released
            && let Err(e) = self.lock.release()
        {
            tracing::warn!(
                path = %self.lock.path().display(),
                error = %e,
                "failed to release lock on scope exit"
            );
        }
    }
}
