//! Named-resource lock factory.
//!
//! Maps logical identifiers to lock paths under one base directory:
//!
//! | call                          | artifact                              |
//! |-------------------------------|---------------------------------------|
//! | `lock_for_task("T-1")`        | `<base>/task-T-1.lock`                |
//! | `lock_for_agent("builder")`   | `<base>/agent-builder.lock`           |
//! | `lock_for_resource("/a/b")`   | `<base>/resource-_a_b~<hash>.lock`    |
//!
//! Marker strategy factories use the `.lockdir` extension instead. Identifier
//! characters outside `[A-Za-z0-9._-]` become `_`; whenever that changes the
//! identifier (or it is truncated) `~` and a stable FNV-1a hash of the
//! original are appended, so distinct identifiers never share a lock.

use super::Lock;
use super::file_lock::ExclusiveFileLock;
use super::marker::{MarkerDirectoryLock, RECORD_FILE};
use super::record::LockRecord;
use super::types::{LockInfo, LockKind};
use super::wrapper;
use crate::config::{LockConfig, LockStrategy};
use crate::error::{LockError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Longest sanitized identifier kept verbatim in a lock name.
const MAX_KEY_LEN: usize = 64;

/// Hands out named locks for one coordination domain.
///
/// Every lock from one factory uses the same strategy and base directory, so
/// two processes constructing factories with the same settings contend on the
/// same artifacts.
#[derive(Debug, Clone)]
pub struct LockFactory {
    base_dir: PathBuf,
    config: LockConfig,
}

/// A lock handed out by a [`LockFactory`].
#[derive(Debug)]
pub enum NamedLock {
    File(ExclusiveFileLock),
    Marker(MarkerDirectoryLock),
}

impl LockFactory {
    /// Factory rooted at `base_dir`. The directory is created on first acquire.
    pub fn new(base_dir: impl Into<PathBuf>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_dir: base_dir.into(),
            config,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Lock serializing work on one task.
    pub fn lock_for_task(&self, task_id: &str) -> Result<NamedLock> {
        self.lock_for(LockKind::Task, task_id)
    }

    /// Lock serializing work by one agent.
    pub fn lock_for_agent(&self, agent_id: &str) -> Result<NamedLock> {
        self.lock_for(LockKind::Agent, agent_id)
    }

    /// Lock protecting an arbitrary path.
    ///
    /// The path is used as given; callers that may spell one file differently
    /// should canonicalize first.
    pub fn lock_for_resource(&self, resource: impl AsRef<Path>) -> Result<NamedLock> {
        self.lock_for(LockKind::Resource, &resource.as_ref().to_string_lossy())
    }

    pub fn lock_for(&self, kind: LockKind, id: &str) -> Result<NamedLock> {
        let path = self.lock_path(kind, id)?;
        Ok(match self.config.strategy {
            LockStrategy::File => NamedLock::File(ExclusiveFileLock::new(path, &self.config)),
            LockStrategy::Marker => {
                let marker = MarkerDirectoryLock::new(path, &self.config);
                NamedLock::Marker(match kind {
                    LockKind::Resource => marker.with_target(id),
                    LockKind::Task | LockKind::Agent => marker,
                })
            }
        })
    }

    /// Deterministic artifact path for a named lock.
    pub fn lock_path(&self, kind: LockKind, id: &str) -> Result<PathBuf> {
        let key = lock_key(kind, id)?;
        Ok(self
            .base_dir
            .join(format!("{}.{}", key, self.config.strategy.extension())))
    }

    /// Run `f` while holding the named lock.
    pub fn with_lock<T, E, F>(&self, kind: LockKind, id: &str, f: F) -> std::result::Result<T, E>
    where
        E: From<LockError>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let mut lock = self.lock_for(kind, id)?;
        wrapper::with_lock(&mut lock, f)
    }

    /// List lock artifacts under the base directory, sorted by name.
    ///
    /// Both file and marker artifacts are reported. A file lock whose kernel
    /// lock is free, or a marker that a contender would reclaim, is stale.
    pub fn list_locks(&self) -> Result<Vec<LockInfo>> {
        let mut locks = Vec::new();

        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(locks),
            Err(e) => return Err(LockError::io("read lock directory", &self.base_dir, e)),
        };

        for entry in entries {
            let entry =
                entry.map_err(|e| LockError::io("read lock directory", &self.base_dir, e))?;
            if let Some(info) = self.inspect_artifact(entry.path()) {
                locks.push(info);
            }
        }

        locks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locks)
    }

    /// Forcibly remove a named lock, whoever holds it.
    ///
    /// Meant for operators cleaning up after crashed holders. Returns what was
    /// removed for auditing.
    pub fn clear_lock(&self, kind: LockKind, id: &str) -> Result<LockInfo> {
        let path = self.lock_path(kind, id)?;

        let info = match fs::symlink_metadata(&path) {
            Ok(_) => self.inspect_artifact(path.clone()),
            Err(e) => return Err(LockError::io("clear lock", &path, e)),
        }
        .ok_or_else(|| LockError::Config(format!("'{}' is not a lock", path.display())))?;

        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| LockError::io("clear lock", &path, e))?;

        warn!(path = %path.display(), stale = info.is_stale, "cleared lock");
        Ok(info)
    }

    fn inspect_artifact(&self, path: PathBuf) -> Option<LockInfo> {
        let extension = path.extension().and_then(|e| e.to_str())?;
        let name = path.file_stem().and_then(|s| s.to_str())?.to_string();
        let (prefix, _) = name.split_once('-')?;
        let kind = LockKind::from_prefix(prefix)?;

        let (record, is_stale) = match extension {
            "lock" if path.is_file() => {
                let record = LockRecord::try_from_file(&path).ok().flatten();
                let held = ExclusiveFileLock::new(&path, &self.config).is_locked();
                (record, !held)
            }
            "lockdir" if path.is_dir() => {
                let record = LockRecord::try_from_file(path.join(RECORD_FILE))
                    .ok()
                    .flatten();
                let held = MarkerDirectoryLock::new(&path, &self.config).is_locked();
                (record, !held)
            }
            _ => return None,
        };

        Some(LockInfo {
            path,
            name,
            kind,
            record,
            is_stale,
        })
    }
}

impl Lock for NamedLock {
    fn path(&self) -> &Path {
        match self {
            NamedLock::File(lock) => lock.path(),
            NamedLock::Marker(lock) => lock.path(),
        }
    }

    fn acquire(&mut self, blocking: bool) -> Result<bool> {
        match self {
            NamedLock::File(lock) => lock.acquire(blocking),
            NamedLock::Marker(lock) => lock.acquire(blocking),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            NamedLock::File(lock) => lock.release(),
            NamedLock::Marker(lock) => lock.release(),
        }
    }

    fn is_locked(&self) -> bool {
        match self {
            NamedLock::File(lock) => lock.is_locked(),
            NamedLock::Marker(lock) => lock.is_locked(),
        }
    }

    fn owns_lock(&self) -> bool {
        match self {
            NamedLock::File(lock) => lock.owns_lock(),
            NamedLock::Marker(lock) => lock.owns_lock(),
        }
    }
}

/// Lock name for `id`, e.g. `task-T-1`.
pub(crate) fn lock_key(kind: LockKind, id: &str) -> Result<String> {
    if id.is_empty() {
        return Err(LockError::Config(format!(
            "{} lock identifier must not be empty",
            kind.as_str()
        )));
    }

    let mut body: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    body.truncate(MAX_KEY_LEN);

    if body != id {
        // `~` never survives sanitizing, so no verbatim id can spell a hashed key
        body = format!("{}~{:016x}", body, fnv1a(id.as_bytes()));
    }

    Ok(format!("{}-{}", kind.as_str(), body))
}

/// 64-bit FNV-1a. Stable across processes and builds.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn factory(dir: &Path, strategy: LockStrategy) -> LockFactory {
        LockFactory::new(dir, LockConfig::default().with_strategy(strategy)).unwrap()
    }

    #[test]
    fn test_task_and_agent_paths_are_readable() {
        let f = factory(Path::new("/var/run/app/locks"), LockStrategy::File);

        assert_eq!(
            f.lock_path(LockKind::Task, "T-1").unwrap(),
            PathBuf::from("/var/run/app/locks/task-T-1.lock")
        );
        assert_eq!(
            f.lock_path(LockKind::Agent, "builder_2").unwrap(),
            PathBuf::from("/var/run/app/locks/agent-builder_2.lock")
        );
    }

    #[test]
    fn test_marker_strategy_uses_lockdir_extension() {
        let f = factory(Path::new("/locks"), LockStrategy::Marker);
        assert_eq!(
            f.lock_path(LockKind::Task, "T-1").unwrap(),
            PathBuf::from("/locks/task-T-1.lockdir")
        );
        assert!(matches!(
            f.lock_for_task("T-1").unwrap(),
            NamedLock::Marker(_)
        ));
    }

    #[test]
    fn test_paths_are_deterministic_across_factories() {
        let a = factory(Path::new("/locks"), LockStrategy::File);
        let b = factory(Path::new("/locks"), LockStrategy::File);

        let resource = Path::new("/srv/shared/queue.json");
        assert_eq!(
            a.lock_for_resource(resource).unwrap().path(),
            b.lock_for_resource(resource).unwrap().path()
        );
    }

    #[test]
    fn test_sanitized_ids_do_not_collide() {
        let task_slash = lock_key(LockKind::Task, "T/1").unwrap();
        let task_colon = lock_key(LockKind::Task, "T:1").unwrap();
        let task_plain = lock_key(LockKind::Task, "T_1").unwrap();

        assert!(task_slash.starts_with("task-T_1~"));
        assert_ne!(task_slash, task_colon);
        assert_ne!(task_slash, task_plain);
        assert_eq!(task_plain, "task-T_1");
    }

    #[test]
    fn test_resource_key_is_a_single_path_component() {
        let key = lock_key(LockKind::Resource, "/srv/shared/queue.json").unwrap();
        assert!(key.starts_with("resource-_srv_shared_queue.json~"));
        assert!(!key.contains('/'));
    }

    #[test]
    fn test_long_ids_are_truncated_and_hashed() {
        let long_a = "a".repeat(200);
        let long_b = format!("{}b", "a".repeat(199));

        let key_a = lock_key(LockKind::Agent, &long_a).unwrap();
        let key_b = lock_key(LockKind::Agent, &long_b).unwrap();

        assert!(key_a.len() < 100);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_verbatim_id_cannot_spell_a_hashed_key() {
        let hashed = lock_key(LockKind::Task, "T/1").unwrap();
        let crafted = format!("T_1-{:016x}", fnv1a(b"T/1"));

        let key = lock_key(LockKind::Task, &crafted).unwrap();
        assert_eq!(key, format!("task-{}", crafted));
        assert_ne!(key, hashed);

        // an id that copies the hashed form exactly is itself sanitized and hashed
        let copied = hashed.trim_start_matches("task-");
        assert_ne!(lock_key(LockKind::Task, copied).unwrap(), hashed);
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let err = lock_key(LockKind::Task, "").unwrap_err();
        assert!(matches!(err, LockError::Config(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = LockConfig::default();
        config.poll_interval_ms = 0;
        assert!(LockFactory::new("/locks", config).is_err());
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_list_locks_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let f = factory(&temp_dir.path().join("absent"), LockStrategy::File);
        assert!(f.list_locks().unwrap().is_empty());
    }

    #[test]
    fn test_list_locks_reports_held_and_abandoned() {
        let temp_dir = TempDir::new().unwrap();
        let f = factory(temp_dir.path(), LockStrategy::File);

        let mut held = f.lock_for_task("T-1").unwrap();
        assert!(held.acquire(false).unwrap());

        // abandoned by a crashed holder: file present, kernel lock gone
        let abandoned = LockRecord::for_current_process();
        fs::write(
            f.lock_path(LockKind::Agent, "crashed").unwrap(),
            abandoned.to_json().unwrap(),
        )
        .unwrap();

        // not ours
        fs::write(temp_dir.path().join("README.md"), "hi").unwrap();

        let locks = f.list_locks().unwrap();
        assert_eq!(locks.len(), 2);

        assert_eq!(locks[0].name, "agent-crashed");
        assert_eq!(locks[0].kind, LockKind::Agent);
        assert!(locks[0].is_stale);

        assert_eq!(locks[1].name, "task-T-1");
        assert_eq!(locks[1].kind, LockKind::Task);
        assert!(!locks[1].is_stale);
        assert_eq!(
            locks[1].record.as_ref().unwrap().pid,
            std::process::id()
        );

        held.release().unwrap();
    }

    #[test]
    fn test_list_locks_reports_marker_locks() {
        let temp_dir = TempDir::new().unwrap();
        let f = factory(temp_dir.path(), LockStrategy::Marker);

        let mut lock = f.lock_for_resource("/srv/status.json").unwrap();
        assert!(lock.acquire(false).unwrap());

        let locks = f.list_locks().unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].kind, LockKind::Resource);
        assert!(!locks[0].is_stale);
        let record = locks[0].record.as_ref().unwrap();
        assert_eq!(record.target, Some(PathBuf::from("/srv/status.json")));

        lock.release().unwrap();
        assert!(f.list_locks().unwrap().is_empty());
    }

    #[test]
    fn test_clear_lock_removes_marker() {
        let temp_dir = TempDir::new().unwrap();
        let f = factory(temp_dir.path(), LockStrategy::Marker);

        let mut lock = f.lock_for_agent("stuck").unwrap();
        assert!(lock.acquire(false).unwrap());

        let cleared = f.clear_lock(LockKind::Agent, "stuck").unwrap();
        assert_eq!(cleared.name, "agent-stuck");
        assert!(!cleared.is_stale);
        assert!(!lock.path().exists());

        // the original holder finds its lock gone
        let err = lock.release().unwrap_err();
        assert!(matches!(err, LockError::Ownership { .. }));
    }

    #[test]
    fn test_clear_lock_nonexistent_fails() {
        let temp_dir = TempDir::new().unwrap();
        let f = factory(temp_dir.path(), LockStrategy::File);

        let err = f.clear_lock(LockKind::Task, "T-999").unwrap_err();
        assert!(err.to_string().contains("clear lock"));
    }

    #[test]
    fn test_lock_info_display() {
        let info = LockInfo {
            path: PathBuf::from("/locks/task-T-1.lock"),
            name: "task-T-1".to_string(),
            kind: LockKind::Task,
            record: Some(LockRecord::for_current_process()),
            is_stale: false,
        };
        let display = info.to_string();
        assert!(display.contains("task-T-1"));
        assert!(display.contains(&std::process::id().to_string()));
        assert!(!display.contains("STALE"));

        let stale = LockInfo {
            record: None,
            is_stale: true,
            ..info
        };
        assert_eq!(stale.to_string(), "task-T-1 (no record, STALE)");
    }
}
