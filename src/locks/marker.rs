//! Marker directory lock with staleness reclamation.
//!
//! `create_dir` is atomic on practically every filesystem, network mounts
//! included, which makes a directory the portable lock artifact. Nothing
//! removes the marker when its holder dies, so contenders judge staleness
//! themselves:
//! - the record is older than `stale_after`, or
//! - the record names a pid on this host that no longer exists, or
//! - the record is corrupt, unreadable, or still missing long after the
//!   marker was created.
//!
//! Markers are taken out of service by renaming them to a unique side path
//! first, so two processes reclaiming the same stale marker cannot delete a
//! lock that a third one has just created. Both before and after that rename
//! the directory is matched against the identity (device, inode, mtime)
//! recorded when it was judged stale; a lock id alone cannot tell a corrupt
//! marker from a fresh one whose record is not written yet.
//!
//! The record is staged inside the marker and hard-linked into place, which
//! fails if a record already exists. The creator never recreates a marker
//! that went missing under it.

use super::Lock;
use super::record::{LockRecord, new_lock_id};
use super::wait::Deadline;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::fs::atomic::sync_parent_dir;
use crate::fs::sibling_path;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Name of the record file inside a marker directory.
pub(crate) const RECORD_FILE: &str = "owner.json";

/// How long a marker without a record counts as still being set up.
const RECORD_GRACE: Duration = Duration::from_secs(5);

/// Exclusive lock represented by the existence of a marker directory.
#[derive(Debug)]
pub struct MarkerDirectoryLock {
    marker: PathBuf,
    target: Option<PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
    stale_after: Duration,
    auto_release: bool,

    /// Id written into the record; `Some` exactly while the lock is held.
    lock_id: Option<String>,
}

/// What a contender finds at an existing marker.
#[derive(Debug)]
enum Holder {
    /// The marker vanished before it could be inspected.
    Absent,
    /// Marker exists, record not written yet.
    Pending,
    Live,
    Stale {
        lock_id: Option<String>,
        reason: &'static str,
        stamp: MarkerStamp,
    },
}

/// Which directory a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<SystemTime>,
}

impl DirIdentity {
    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

/// A marker directory as seen at one moment.
///
/// Inode numbers are reused once a directory is deleted, so the mtime is
/// part of the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MarkerStamp {
    identity: DirIdentity,
    modified: Option<SystemTime>,
}

impl MarkerStamp {
    fn read(marker: &Path) -> io::Result<Self> {
        let meta = fs::metadata(marker)?;
        Ok(Self {
            identity: DirIdentity::of(&meta),
            modified: meta.modified().ok(),
        })
    }

    fn age(&self) -> Duration {
        self.modified
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or_default()
    }
}

/// Outcome of writing the record into a marker this handle created.
#[derive(Debug, PartialEq, Eq)]
enum Claim {
    Claimed,
    /// Another contender's record is already in place.
    Taken,
    /// The marker path no longer names the directory this handle created.
    Displaced,
}

impl MarkerDirectoryLock {
    /// Handle for the marker directory at `marker`. Touches nothing on disk.
    pub fn new(marker: impl Into<PathBuf>, config: &LockConfig) -> Self {
        Self {
            marker: marker.into(),
            target: None,
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            stale_after: config.stale_after(),
            auto_release: config.auto_release,
            lock_id: None,
        }
    }

    /// Handle keyed to `target` through the sibling marker `.{name}.lockdir`.
    pub fn for_target(target: impl AsRef<Path>, config: &LockConfig) -> Self {
        let target = target.as_ref();
        Self::new(sibling_path(target, "lockdir"), config).with_target(target)
    }

    /// Record `target` as the protected resource in the lock record.
    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Id of the current acquisition, if held.
    pub fn lock_id(&self) -> Option<&str> {
        self.lock_id.as_deref()
    }

    pub fn record_path(&self) -> PathBuf {
        self.marker.join(RECORD_FILE)
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Read the current holder's record, if any.
    pub fn holder(&self) -> Result<Option<LockRecord>> {
        LockRecord::try_from_file(self.record_path())
    }

    fn inspect(&self) -> Holder {
        let stamp = match MarkerStamp::read(&self.marker) {
            Ok(stamp) => stamp,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Holder::Absent,
            Err(_) => return Holder::Pending,
        };

        let stale = |lock_id, reason| Holder::Stale {
            lock_id,
            reason,
            stamp,
        };

        match self.holder() {
            Ok(Some(record)) => {
                if record.is_stale(self.stale_after) {
                    stale(record.lock_id, "lock age exceeds staleness threshold")
                } else if record.holder_is_gone() {
                    stale(record.lock_id, "holder process no longer exists")
                } else {
                    Holder::Live
                }
            }
            Ok(None) if stamp.age() < RECORD_GRACE => Holder::Pending,
            Ok(None) => stale(None, "lock record is missing"),
            Err(e) => {
                warn!(path = %self.marker.display(), error = %e, "treating unreadable lock record as stale");
                stale(None, "lock record is unreadable")
            }
        }
    }

    /// Write the record into the marker this handle just created and take
    /// ownership.
    ///
    /// `Ok(false)` if the marker changed hands before the record landed; the
    /// caller goes back to contending.
    fn claim(&mut self) -> Result<bool> {
        let created = match MarkerStamp::read(&self.marker) {
            Ok(stamp) => stamp.identity,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LockError::acquisition(&self.marker, e)),
        };

        let lock_id = new_lock_id();
        let mut record = LockRecord::for_current_process().with_lock_id(lock_id.as_str());
        if let Some(target) = &self.target {
            record = record.with_target(target);
        }
        let json = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.abandon(created);
                return Err(e);
            }
        };

        match self.write_record(created, &lock_id, json.as_bytes()) {
            Ok(Claim::Claimed) => {
                debug!(path = %self.marker.display(), lock_id = %lock_id, "acquired marker lock");
                self.lock_id = Some(lock_id);
                Ok(true)
            }
            Ok(Claim::Taken) => {
                debug!(path = %self.marker.display(), "marker claimed by another contender");
                Ok(false)
            }
            Ok(Claim::Displaced) => {
                debug!(path = %self.marker.display(), "marker displaced while claiming");
                self.abandon(created);
                Ok(false)
            }
            Err(e) => {
                self.abandon(created);
                Err(LockError::acquisition(&self.marker, e))
            }
        }
    }

    /// Stage the record inside the marker, then link it in as the record file.
    ///
    /// The staged file only exists in the directory it was written to, and
    /// linking never replaces an existing record.
    fn write_record(&self, created: DirIdentity, lock_id: &str, content: &[u8]) -> io::Result<Claim> {
        let staged = self.marker.join(format!(".{}.{}.tmp", RECORD_FILE, lock_id));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&staged) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Claim::Displaced),
            Err(e) => return Err(e),
        };
        let written = file.write_all(content).and_then(|()| file.sync_all());
        drop(file);

        let linked = written.and_then(|()| {
            if self.names(created)? {
                fs::hard_link(&staged, self.record_path()).map(|()| true)
            } else {
                Ok(false)
            }
        });
        let _ = fs::remove_file(&staged);

        match linked {
            Ok(true) => {}
            Ok(false) => return Ok(Claim::Displaced),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(Claim::Taken),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Claim::Displaced),
            Err(e) => return Err(e),
        }
        sync_parent_dir(&self.record_path());

        if !self.names(created)? {
            Ok(Claim::Displaced)
        } else if read_lock_id(&self.marker).as_deref() == Some(lock_id) {
            Ok(Claim::Claimed)
        } else {
            Ok(Claim::Taken)
        }
    }

    /// Whether the marker path currently names the directory `identity`.
    fn names(&self, identity: DirIdentity) -> io::Result<bool> {
        match MarkerStamp::read(&self.marker) {
            Ok(stamp) => Ok(stamp.identity == identity),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a marker this handle created but could not claim.
    ///
    /// Left alone once the path names another directory.
    fn abandon(&self, created: DirIdentity) {
        match self.names(created) {
            Ok(true) => {
                if let Err(e) = fs::remove_dir_all(&self.marker) {
                    warn!(path = %self.marker.display(), error = %e, "could not remove unclaimed marker");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(path = %self.marker.display(), error = %e, "could not inspect unclaimed marker");
            }
        }
    }

    /// Take a stale marker out of service.
    ///
    /// `judged` and `stamp` describe the marker when staleness was decided.
    /// A marker that no longer matches them is left where it is, or put back
    /// if it was already moved aside. Returns whether the stale marker is gone.
    fn reclaim(&self, judged: Option<&str>, stamp: &MarkerStamp, reason: &'static str) -> Result<bool> {
        match MarkerStamp::read(&self.marker) {
            Ok(current) if current == *stamp => {}
            Ok(_) => {
                debug!(path = %self.marker.display(), "marker changed hands before reclamation");
                return Ok(false);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(LockError::acquisition(&self.marker, e)),
        }

        let Some(aside) = self
            .move_aside("stale")
            .map_err(|e| LockError::acquisition(&self.marker, e))?
        else {
            // another contender got there first
            return Ok(true);
        };

        let moved = MarkerStamp::read(&aside).ok();
        if moved.as_ref() != Some(stamp) || read_lock_id(&aside).as_deref() != judged {
            debug!(path = %self.marker.display(), "marker changed hands before reclamation");
            self.put_back(&aside);
            return Ok(false);
        }

        warn!(
            path = %self.marker.display(),
            stale_lock_id = judged.unwrap_or("none"),
            reason,
            "reclaimed stale marker lock"
        );
        if let Err(e) = fs::remove_dir_all(&aside) {
            warn!(path = %aside.display(), error = %e, "could not remove reclaimed marker");
        }
        Ok(true)
    }

    /// Atomically rename the marker to a unique side path.
    ///
    /// `Ok(None)` if there was no marker to move.
    fn move_aside(&self, tag: &str) -> io::Result<Option<PathBuf>> {
        let name = self
            .marker
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let aside = self
            .marker
            .with_file_name(format!("{}.{}-{}", name, tag, new_lock_id()));

        match fs::rename(&self.marker, &aside) {
            Ok(()) => Ok(Some(aside)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put_back(&self, aside: &Path) {
        if self.marker.exists() {
            warn!(
                path = %self.marker.display(),
                displaced = %aside.display(),
                "marker re-created while displaced; leaving displaced lock aside"
            );
            return;
        }
        if let Err(e) = fs::rename(aside, &self.marker) {
            warn!(path = %self.marker.display(), error = %e, "could not restore displaced marker");
        }
    }

    fn ownership_error(&self, expected: String, found: Option<String>) -> LockError {
        LockError::Ownership {
            path: self.marker.clone(),
            expected,
            found,
        }
    }
}

impl Lock for MarkerDirectoryLock {
    fn path(&self) -> &Path {
        &self.marker
    }

    fn acquire(&mut self, blocking: bool) -> Result<bool> {
        if self.lock_id.is_some() {
            debug!(path = %self.marker.display(), "marker lock already held by this handle");
            return Ok(true);
        }

        if let Some(parent) = self.marker.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LockError::acquisition(&self.marker, e))?;
        }

        let deadline = Deadline::after(self.timeout);

        loop {
            match fs::create_dir(&self.marker) {
                Ok(()) => {
                    if self.claim()? {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(LockError::acquisition(&self.marker, e)),
            }

            match self.inspect() {
                Holder::Absent => continue,
                // reclaiming does not consume the timeout
                Holder::Stale {
                    lock_id,
                    reason,
                    stamp,
                } => {
                    if self.reclaim(lock_id.as_deref(), &stamp, reason)? {
                        continue;
                    }
                }
                Holder::Pending | Holder::Live => {}
            }

            if !blocking {
                return Ok(false);
            }

            if !deadline.wait(self.poll_interval) {
                return Err(LockError::Timeout {
                    path: self.marker.clone(),
                    waited: self.timeout,
                });
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        let Some(lock_id) = self.lock_id.take() else {
            return Ok(());
        };

        // Cheap check first: a marker that is visibly someone else's is left alone.
        let current = read_lock_id(&self.marker);
        if current.as_deref() != Some(lock_id.as_str()) {
            return Err(self.ownership_error(lock_id, current));
        }

        let aside = match self.move_aside("released") {
            Ok(Some(aside)) => aside,
            Ok(None) => return Err(self.ownership_error(lock_id, None)),
            Err(e) => {
                self.lock_id = Some(lock_id);
                return Err(LockError::io("release marker lock", &self.marker, e));
            }
        };

        // The marker may have been reclaimed between the check and the rename.
        let moved = read_lock_id(&aside);
        if moved.as_deref() != Some(lock_id.as_str()) {
            self.put_back(&aside);
            return Err(self.ownership_error(lock_id, moved));
        }

        if let Err(e) = fs::remove_dir_all(&aside) {
            warn!(path = %aside.display(), error = %e, "could not remove released marker");
        }

        debug!(path = %self.marker.display(), lock_id = %lock_id, "released marker lock");
        Ok(())
    }

    fn is_locked(&self) -> bool {
        if self.lock_id.is_some() {
            return true;
        }
        matches!(self.inspect(), Holder::Live | Holder::Pending)
    }

    fn owns_lock(&self) -> bool {
        self.lock_id.is_some()
    }
}

impl Drop for MarkerDirectoryLock {
    fn drop(&mut self) {
        if self.auto_release
            && self.lock_id.is_some()
            && let Err(e) = self.release()
        {
            warn!(path = %self.marker.display(), error = %e, "failed to release marker lock on drop");
        }
    }
}

/// Lock id recorded inside a marker directory, if readable.
fn read_lock_id(marker: &Path) -> Option<String> {
    LockRecord::try_from_file(marker.join(RECORD_FILE))
        .ok()
        .flatten()
        .and_then(|record| record.lock_id)
}
