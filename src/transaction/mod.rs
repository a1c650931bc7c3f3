//! Transactional single-file updates.
//!
//! A [`TransactionalFileUpdate`] serializes read-modify-write cycles on one
//! file across processes and undoes a failed cycle:
//!
//! 1. take an [`ExclusiveFileLock`] on the sibling `.<name>.lock`
//! 2. snapshot the target to the sibling `.<name>.bak`
//! 3. let the caller modify the target in place
//! 4. on success drop the snapshot; on failure or panic restore it
//!
//! Removing the backup is the commit point. A backup found when a transaction
//! begins belongs to a holder that died mid-update and is restored first.

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::fs::{atomic_replace, atomic_write, sibling_path};
use crate::locks::{ExclusiveFileLock, Lock};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Settings for locked, rollback-capable updates of one file.
#[derive(Debug, Clone)]
pub struct TransactionalFileUpdate {
    target: PathBuf,
    backup: bool,
    config: LockConfig,
}

/// An update in progress. Holds the lock until committed or rolled back.
///
/// Dropping it without calling [`FileTransaction::commit`] rolls back.
#[derive(Debug)]
pub struct FileTransaction {
    target: PathBuf,
    backup: Option<PathBuf>,

    /// Target did not exist at begin; rollback removes it.
    created: bool,

    lock: ExclusiveFileLock,
    finished: bool,
}

impl TransactionalFileUpdate {
    /// Update of `target` with backups on and the default lock settings.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            backup: true,
            config: LockConfig::default(),
        }
    }

    /// Whether to snapshot the target for rollback. Without a backup a failed
    /// update leaves the target as the caller left it.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling_path(&self.target, "lock")
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_path(&self.target, "bak")
    }

    /// Lock the target and snapshot it.
    ///
    /// Blocks up to the configured timeout waiting for the lock.
    pub fn begin(&self) -> Result<FileTransaction> {
        let mut lock = ExclusiveFileLock::new(self.lock_path(), &self.config);
        lock.acquire(true)?;

        match self.prepare() {
            Ok((backup, created)) => {
                debug!(path = %self.target.display(), backup = backup.is_some(), "began file transaction");
                Ok(FileTransaction {
                    target: self.target.clone(),
                    backup,
                    created,
                    lock,
                    finished: false,
                })
            }
            Err(e) => {
                if let Err(release_err) = lock.release() {
                    warn!(path = %lock.path().display(), error = %release_err, "failed to release lock after aborted transaction");
                }
                Err(e)
            }
        }
    }

    /// Run `f` on the target inside a transaction.
    ///
    /// `f` receives the target path. `Ok` commits; `Err` rolls back and is
    /// returned unchanged. A rollback failure on that path is logged.
    pub fn run<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<LockError>,
        F: FnOnce(&Path) -> std::result::Result<T, E>,
    {
        let transaction = self.begin()?;

        match f(transaction.path()) {
            Ok(value) => {
                transaction.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = transaction.rollback() {
                    warn!(path = %self.target.display(), error = %rollback_err, "failed to roll back file transaction");
                }
                Err(e)
            }
        }
    }

    /// Recover from an interrupted transaction, then snapshot the target.
    fn prepare(&self) -> Result<(Option<PathBuf>, bool)> {
        let backup_path = self.backup_path();

        // a lock holder died between backup and commit
        if backup_path.exists() {
            warn!(
                path = %self.target.display(),
                backup = %backup_path.display(),
                "restoring backup left by an interrupted transaction"
            );
            atomic_replace(&backup_path, &self.target)?;
        }

        if !self.backup {
            return Ok((None, false));
        }

        match fs::read(&self.target) {
            Ok(content) => {
                atomic_write(&backup_path, &content)?;
                Ok((Some(backup_path), false))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok((None, true)),
            Err(e) => Err(LockError::io("back up", &self.target, e)),
        }
    }
}

impl FileTransaction {
    /// The file being updated.
    pub fn path(&self) -> &Path {
        &self.target
    }

    /// Snapshot taken at begin, if any.
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Keep the changes, drop the snapshot and release the lock.
    pub fn commit(mut self) -> Result<()> {
        let outcome = self.discard_backup();
        self.finish(outcome)?;
        debug!(path = %self.target.display(), "committed file transaction");
        Ok(())
    }

    /// Restore the snapshot and release the lock.
    pub fn rollback(mut self) -> Result<()> {
        let outcome = self.restore();
        self.finish(outcome)?;
        debug!(path = %self.target.display(), "rolled back file transaction");
        Ok(())
    }

    fn discard_backup(&self) -> Result<()> {
        match &self.backup {
            Some(backup) => match fs::remove_file(backup) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(LockError::io("remove backup", backup, e)),
            },
            None => Ok(()),
        }
    }

    fn restore(&self) -> Result<()> {
        if let Some(backup) = &self.backup {
            return atomic_replace(backup, &self.target);
        }

        if self.created {
            match fs::remove_file(&self.target) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LockError::io("remove", &self.target, e)),
            }
        }
        Ok(())
    }

    /// Release the lock whatever the outcome. The outcome's error wins.
    fn finish(&mut self, outcome: Result<()>) -> Result<()> {
        self.finished = true;
        let released = self.lock.release();
        outcome?;
        released
    }
}

impl Drop for FileTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let outcome = self.restore();
        if let Err(e) = self.finish(outcome) {
            warn!(path = %self.target.display(), error = %e, "failed to roll back abandoned file transaction");
        } else {
            debug!(path = %self.target.display(), "rolled back abandoned file transaction");
        }
    }
}
