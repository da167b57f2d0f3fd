//! # Errors
//! Misuse of a lock is reported synchronously to whoever triggered it.
//!
//! Broken waiter bookkeeping inside a monitor isn't an error at all - there's no way back from it,
//! see [crate::monitor::fatal].

use thiserror::Error;

/// Everything a lock, guard or monitor can report to its caller
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The calling thread already owns the lock it tries to take again
    #[error("resource deadlock would occur")]
    DeadlockWouldOccur,

    /// Unlock without ownership or a lock operation on a guard with no lock behind it
    #[error("operation not permitted")]
    OperationNotPermitted,

    /// The OS refused to hand out a handle (errno attached)
    #[error("resource unavailable, try again (errno {0})")]
    ResourceUnavailable(i32),

    /// Monitor configuration rejected at construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Any other errno coming back from a pthread call
    #[error("{op} failed with errno {code}")]
    Os { op: &'static str, code: i32 },
}

impl SyncError {
    /// Translates a non-zero pthread return code into an error.
    /// Quota problems become [SyncError::ResourceUnavailable], EDEADLK and EPERM keep their meaning.
    pub(crate) fn from_errno(op: &'static str, code: i32) -> Self {
        match code {
            libc::EAGAIN | libc::ENOMEM => Self::ResourceUnavailable(code),
            libc::EDEADLK => Self::DeadlockWouldOccur,
            libc::EPERM => Self::OperationNotPermitted,
            _ => Self::Os { op, code },
        }
    }
}

/// 0 is success for the whole pthread family
pub(crate) fn check(op: &'static str, code: i32) -> Result<(), SyncError> {
    if code == 0 {
        Ok(())
    } else {
        Err(SyncError::from_errno(op, code))
    }
}
