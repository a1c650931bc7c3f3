//! Kernel advisory lock on a regular file.

use super::Lock;
use super::record::LockRecord;
use super::wait::Deadline;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::fs::sibling_path;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Exclusive advisory lock on one lock file.
///
/// The lock lives on the open descriptor: the kernel drops it when the holder
/// exits, so a lock file left behind by a crash is harmless. The record written
/// into the file is informational only.
#[derive(Debug)]
pub struct ExclusiveFileLock {
    path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    auto_release: bool,

    /// Open, locked descriptor while the lock is held.
    file: Option<File>,
}

impl ExclusiveFileLock {
    /// Handle for the lock file at `path`. Touches nothing on disk.
    pub fn new(path: impl Into<PathBuf>, config: &LockConfig) -> Self {
        Self {
            path: path.into(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            auto_release: config.auto_release,
            file: None,
        }
    }

    /// Handle keyed to `target` through the sibling hidden file `.{name}.lock`.
    pub fn for_target(target: impl AsRef<Path>, config: &LockConfig) -> Self {
        Self::new(sibling_path(target.as_ref(), "lock"), config)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the lock file and take the kernel lock once.
    ///
    /// `Ok(None)` means someone else holds it.
    fn try_lock_once(&self) -> Result<Option<File>> {
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| LockError::acquisition(&self.path, e))?;

            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if is_contended(&e) => return Ok(None),
                Err(e) => return Err(LockError::acquisition(&self.path, e)),
            }

            // A releaser unlinks the file; a waiter that opened it earlier now
            // holds a lock on an inode nobody else can reach.
            let linked =
                still_linked(&file, &self.path).map_err(|e| LockError::acquisition(&self.path, e))?;
            if linked {
                return Ok(Some(file));
            }
            trace!(path = %self.path.display(), "lock file replaced while acquiring, reopening");
        }
    }

    fn write_record(&self, file: &File) -> Result<()> {
        let json = LockRecord::for_current_process().to_json()?;

        let mut writer = file;
        file.set_len(0)
            .and_then(|()| writer.write_all(json.as_bytes()))
            .and_then(|()| file.sync_all())
            .map_err(|e| LockError::acquisition(&self.path, e))
    }
}

impl Lock for ExclusiveFileLock {
    fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&mut self, blocking: bool) -> Result<bool> {
        if self.file.is_some() {
            debug!(path = %self.path.display(), "lock already held by this handle");
            return Ok(true);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LockError::acquisition(&self.path, e))?;
        }

        let deadline = Deadline::after(self.timeout);

        loop {
            if let Some(file) = self.try_lock_once()? {
                // on failure the descriptor drops here, releasing the kernel lock
                self.write_record(&file)?;
                self.file = Some(file);
                debug!(path = %self.path.display(), "acquired file lock");
                return Ok(true);
            }

            if !blocking {
                return Ok(false);
            }

            if !deadline.wait(self.poll_interval) {
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited: self.timeout,
                });
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        // Unlink before unlocking: waiters blocked on this inode notice the
        // missing path and reopen instead of holding a dead lock.
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            debug!(path = %self.path.display(), error = %e, "could not remove lock file");
        }

        let unlocked = FileExt::unlock(&file);
        drop(file);
        unlocked.map_err(|e| LockError::io("unlock", &self.path, e))?;

        debug!(path = %self.path.display(), "released file lock");
        Ok(())
    }

    fn is_locked(&self) -> bool {
        if self.file.is_some() {
            return true;
        }

        // separate descriptor; never creates the file
        let Ok(file) = File::open(&self.path) else {
            return false;
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(e) => is_contended(&e),
        }
    }

    fn owns_lock(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for ExclusiveFileLock {
    fn drop(&mut self) {
        if self.auto_release
            && self.file.is_some()
            && let Err(e) = self.release()
        {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock on drop");
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Open files cannot be deleted on Windows, so the path always names the locked file.
#[cfg(not(unix))]
fn still_linked(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}
