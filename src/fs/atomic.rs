//! Atomic filesystem operations.
//!
//! Lock records and restored backups must never be observed half-written by
//! another process. All writes here follow the same pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Atomically rename it over the target
//!
//! Source and destination must live on the same filesystem for the rename to
//! be atomic. On crash a temporary file named `.{filename}.{pid}.tmp` may
//! remain next to the target.

use crate::error::{LockError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file.
///
/// The parent directory is created if it does not exist.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)
            .map_err(|e| LockError::io("create parent directory", parent, e))?;
    }

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;
    atomic_replace(&temp_path, path)
}

/// Atomically move `source` over `target`, replacing it if present.
///
/// `source` no longer exists afterwards. On failure `source` is left in
/// place so the caller can retry or inspect it.
pub fn atomic_replace<P: AsRef<Path>, Q: AsRef<Path>>(source: P, target: Q) -> Result<()> {
    let source = source.as_ref();
    let target = target.as_ref();

    fs::rename(source, target).map_err(|e| LockError::io("atomically replace", target, e))?;
    sync_parent_dir(target);
    Ok(())
}

/// Temp file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        LockError::Config(format!("invalid file path '{}'", target.display()))
    })?;

    // pid suffix keeps concurrent writers in different processes apart
    let temp_name = format!(".{}.{}.tmp", filename, std::process::id());
    Ok(parent.join(temp_name))
}

fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).map_err(|e| LockError::io("create temporary file", path, e))?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::io("write temporary file", path, e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::io("sync temporary file", path, e)
    })?;

    Ok(())
}

/// Persist the directory entry after a rename. Best effort.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_target: &Path) {}
