//! # Operating System Primitives
//! Everything the locks and monitors need from the OS, on top of POSIX threads:
//! - `pthread_mutex_t`, normal or recursive
//! - `pthread_cond_t`, bound to the monotonic clock where the platform lets us
//! - a bounded counting [Semaphore] with initial count 0
//! - a [WakeEvent] that stays signaled until one waiter consumes it
//!
//! Blocking waits report a [WaitOutcome] and never panic. Whether a failure is fatal is the caller's call.

use std::time::Duration;

use crate::error::SyncError;

mod event;
mod pthread;
mod semaphore;

pub use event::WakeEvent;
pub use pthread::{MutexKind, PthreadCond, PthreadGuard, PthreadMutex};
pub use semaphore::Semaphore;

/// Longest finite wait a blocking call accepts: 2^32 - 2 milliseconds, about 49.7 days.
/// One more and it would be u32::MAX, the usual "infinite" sentinel for millisecond waits.
pub const MAX_FINITE_WAIT: Duration = Duration::from_millis(u32::MAX as u64 - 1);

/// What a blocking wait on a handle ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Failed(SyncError),
}

/// Absolute deadline on [pthread::WAIT_CLOCK], saturating instead of overflowing
pub(crate) fn deadline_after(timeout: Duration) -> libc::timespec {
    // SAFETY: timespec is plain data, the zeroed value is valid
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: now is a valid out pointer, the clock id is a constant every platform supports
    unsafe { libc::clock_gettime(pthread::WAIT_CLOCK, &mut now) };

    let secs = libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX);
    let mut sec = now.tv_sec.saturating_add(secs);
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }

    let mut at: libc::timespec = unsafe { std::mem::zeroed() };
    at.tv_sec = sec;
    at.tv_nsec = nsec;
    at
}
