//! Deadline bookkeeping for polling acquisition loops.

use std::thread;
use std::time::{Duration, Instant};

pub(crate) struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Sleep one poll interval, clipped to the time left.
    ///
    /// Returns `false` without sleeping once the deadline has passed.
    pub(crate) fn wait(&self, poll_interval: Duration) -> bool {
        match self.timeout.checked_sub(self.start.elapsed()) {
            Some(remaining) if !remaining.is_zero() => {
                thread::sleep(poll_interval.min(remaining));
                true
            }
            _ => false,
        }
    }
}
