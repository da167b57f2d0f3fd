//! Timeout clamping.
//!
//! A finite timeout must stay finite: anything past [MAX_FINITE_WAIT] is cut down to it,
//! deadlines in the past become zero. Nobody gets an unbounded wait by passing a huge duration.

use std::time::{Duration, Instant};

use crate::os::MAX_FINITE_WAIT;

pub fn clamp(timeout: Duration) -> Duration {
    timeout.min(MAX_FINITE_WAIT)
}

/// Time left until `deadline`, clamped
pub fn remaining(deadline: Instant) -> Duration {
    clamp(deadline.saturating_duration_since(Instant::now()))
}

/// Signed milliseconds, for callers counting in plain integers: negatives mean "don't wait"
pub fn from_millis(millis: i64) -> Duration {
    match u64::try_from(millis) {
        Ok(ms) => clamp(Duration::from_millis(ms)),
        Err(_) => Duration::ZERO,
    }
}
