//! proclock: process-level locks and transactional file updates.
//!
//! Cooperating processes on one host (or sharing a filesystem) coordinate
//! through lock artifacts on disk:
//!
//! - [`ExclusiveFileLock`]: kernel advisory lock, released automatically when
//!   the holder dies.
//! - [`MarkerDirectoryLock`]: atomic directory creation with an `owner.json`
//!   record; abandoned markers are reclaimed by age or dead holder pid.
//! - [`TransactionalFileUpdate`]: locked read-modify-write of one file with
//!   backup and rollback.
//! - [`LockFactory`]: deterministic named locks for tasks, agents and
//!   resource paths.
//!
//! ```no_run
//! use proclock::{Lock, LockConfig, LockFactory};
//!
//! # fn main() -> proclock::Result<()> {
//! let factory = LockFactory::new("/var/run/app/locks", LockConfig::default())?;
//! let mut lock = factory.lock_for_task("T-1")?;
//! let _guard = lock.lock()?;
//! // exclusive section
//! # Ok(())
//! # }
//! ```
//!
//! Locks are advisory: they only exclude processes that use them.

pub mod config;
pub mod error;
pub mod fs;
pub mod locks;
pub mod transaction;

pub use config::{LockConfig, LockStrategy};
pub use error::{LockError, Result};
pub use locks::{
    ExclusiveFileLock, Lock, LockFactory, LockGuard, LockInfo, LockKind, LockRecord,
    MarkerDirectoryLock, NamedLock, with_file_lock, with_lock,
};
pub use transaction::{FileTransaction, TransactionalFileUpdate};
