//! Tests for transactional file updates.

use super::*;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn fast_config() -> LockConfig {
    LockConfig::default()
        .with_timeout(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(5))
}

fn setup(content: Option<&str>) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("state.txt");
    if let Some(content) = content {
        fs::write(&target, content).unwrap();
    }
    (temp_dir, target)
}

#[derive(Debug)]
enum UpdateError {
    Lock(LockError),
    Rejected,
}

impl From<LockError> for UpdateError {
    fn from(e: LockError) -> Self {
        UpdateError::Lock(e)
    }
}

#[test]
fn test_failed_update_restores_original() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    let result: std::result::Result<(), UpdateError> = update.run(|path| {
        fs::write(path, "v2").unwrap();
        Err(UpdateError::Rejected)
    });

    assert!(matches!(result, Err(UpdateError::Rejected)));
    assert_eq!(fs::read_to_string(&target).unwrap(), "v1");
    assert!(!update.backup_path().exists());
    assert!(!update.lock_path().exists());
}

#[test]
fn test_successful_update_keeps_changes() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    let previous = update
        .run(|path| {
            let previous = fs::read_to_string(path).unwrap();
            fs::write(path, "v2").unwrap();
            Ok::<_, LockError>(previous)
        })
        .unwrap();

    assert_eq!(previous, "v1");
    assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
    assert!(!update.backup_path().exists());
    assert!(!update.lock_path().exists());
}

#[test]
fn test_backup_exists_during_update() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    update
        .run(|_| {
            assert_eq!(fs::read_to_string(update.backup_path()).unwrap(), "v1");
            assert!(update.lock_path().exists());
            Ok::<_, LockError>(())
        })
        .unwrap();
}

#[test]
fn test_panic_during_update_rolls_back() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    let result = std::panic::catch_unwind(|| {
        let _: std::result::Result<(), LockError> = update.run(|path| {
            fs::write(path, "half-written").unwrap();
            panic!("crashed mid-update");
        });
    });

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&target).unwrap(), "v1");
    assert!(!update.backup_path().exists());
    assert!(!update.lock_path().exists());
}

#[test]
fn test_failed_update_removes_created_file() {
    let (_temp_dir, target) = setup(None);
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    let result: std::result::Result<(), UpdateError> = update.run(|path| {
        fs::write(path, "new").unwrap();
        Err(UpdateError::Rejected)
    });

    assert!(result.is_err());
    assert!(!target.exists());
}

#[test]
fn test_successful_update_creates_file() {
    let (_temp_dir, target) = setup(None);
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    update
        .run(|path| fs::write(path, "new").map_err(|e| LockError::io("write", path, e)))
        .unwrap();

    assert_eq!(fs::read_to_string(&target).unwrap(), "new");
}

#[test]
fn test_without_backup_failure_keeps_changes() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target)
        .with_config(fast_config())
        .with_backup(false);

    let result: std::result::Result<(), UpdateError> = update.run(|path| {
        assert!(!update.backup_path().exists());
        fs::write(path, "v2").unwrap();
        Err(UpdateError::Rejected)
    });

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
    assert!(!update.lock_path().exists());
}

#[test]
fn test_explicit_commit_and_rollback() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    let transaction = update.begin().unwrap();
    assert_eq!(transaction.path(), target);
    assert_eq!(transaction.backup_path(), Some(update.backup_path().as_path()));
    fs::write(transaction.path(), "v2").unwrap();
    transaction.rollback().unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "v1");

    let transaction = update.begin().unwrap();
    fs::write(transaction.path(), "v3").unwrap();
    transaction.commit().unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "v3");
    assert!(!update.backup_path().exists());
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    {
        let transaction = update.begin().unwrap();
        fs::write(transaction.path(), "v2").unwrap();
    }

    assert_eq!(fs::read_to_string(&target).unwrap(), "v1");
    assert!(!update.lock_path().exists());
}

#[test]
fn test_leftover_backup_is_restored_on_begin() {
    let (_temp_dir, target) = setup(Some("torn wri"));
    let update = TransactionalFileUpdate::new(&target).with_config(fast_config());

    // holder died after taking its backup, mid-write
    fs::write(update.backup_path(), "v1").unwrap();

    let seen = update
        .run(|path| Ok::<_, LockError>(fs::read_to_string(path).unwrap()))
        .unwrap();

    assert_eq!(seen, "v1");
    assert!(!update.backup_path().exists());
}

#[test]
fn test_update_waits_for_lock_and_times_out() {
    let (_temp_dir, target) = setup(Some("v1"));
    let update = TransactionalFileUpdate::new(&target)
        .with_config(fast_config())
        .with_timeout(Duration::from_millis(100));

    let mut holder = ExclusiveFileLock::new(update.lock_path(), &fast_config());
    assert!(holder.acquire(false).unwrap());

    let mut ran = false;
    let result: std::result::Result<(), UpdateError> = update.run(|_| {
        ran = true;
        Ok(())
    });

    assert!(matches!(result, Err(UpdateError::Lock(LockError::Timeout { .. }))));
    assert!(!ran);
    assert!(!update.backup_path().exists());
    holder.release().unwrap();
}

#[test]
#[serial]
fn test_concurrent_updates_are_serialized() {
    let (_temp_dir, target) = setup(Some("0"));
    let update = Arc::new(TransactionalFileUpdate::new(&target).with_config(fast_config()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let update = Arc::clone(&update);
            thread::spawn(move || {
                for _ in 0..10 {
                    update
                        .run(|path| {
                            let value: u32 = fs::read_to_string(path).unwrap().parse().unwrap();
                            fs::write(path, (value + 1).to_string()).unwrap();
                            Ok::<_, LockError>(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fs::read_to_string(&target).unwrap(), "40");
}
