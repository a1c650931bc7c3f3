//! Host-local process liveness probe.
//!
//! `kill(pid, 0)` sends nothing and only reports whether the pid exists. The
//! answer is racy against pid reuse: a recycled pid reads as alive. "No such
//! process" is strong evidence that a holder crashed.

/// Whether `pid` names a live process on this host.
#[cfg(unix)]
pub(crate) fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // 0 and negative values address process groups, not a single process
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }

    // EPERM: the process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a probe, every holder is presumed alive; only age makes it stale.
#[cfg(not(unix))]
pub(crate) fn is_pid_alive(_pid: u32) -> bool {
    true
}
