//! Filesystem helpers shared by the lock primitives.

pub mod atomic;

pub use atomic::{atomic_replace, atomic_write};

use std::path::{Path, PathBuf};

/// Hidden sibling `.{name}.{suffix}` next to `target`.
///
/// `sibling_path("/srv/queue.json", "lock")` is `/srv/.queue.json.lock`.
pub fn sibling_path(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    target.with_file_name(format!(".{}.{}", name, suffix))
}
