//! Process termination for broken monitor bookkeeping.
//!
//! Once the waiter count is seen inconsistent, other threads may be blocked on a semaphore unit
//! that will never come, or hold one they shouldn't. There's no state to roll back to => abort.

use std::{fmt, panic::Location};

use log::error;

/// Logs the failing primitive and the caller's location, then aborts.
/// Goes through stderr as well, there may be no logger installed.
#[cold]
#[track_caller]
pub fn terminate(primitive: &str, what: fmt::Arguments<'_>) -> ! {
    let at = Location::caller();
    error!("fatal error in {primitive} at {at}: {what}");
    eprintln!("locks-n-monitors: fatal error in {primitive} at {at}: {what}");
    std::process::abort()
}
