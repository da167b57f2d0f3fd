//! Auto-resetting event: a signal sticks until exactly one waiter takes it.
//! Signaling an already signaled event is a no-op, so is signaling with nobody around.

use std::{cell::UnsafeCell, time::Duration};

use super::{MutexKind, PthreadCond, PthreadMutex, WaitOutcome};
use crate::error::SyncError;

pub struct WakeEvent {
    mutex: PthreadMutex,
    cond: PthreadCond,
    signaled: UnsafeCell<bool>,
}

unsafe impl Send for WakeEvent {}
unsafe impl Sync for WakeEvent {}

impl WakeEvent {
    pub fn new() -> Result<Self, SyncError> {
        Ok(Self {
            mutex: PthreadMutex::new(MutexKind::Normal)?,
            cond: PthreadCond::new()?,
            signaled: UnsafeCell::new(false),
        })
    }

    pub fn set(&self) -> Result<(), SyncError> {
        let _guard = self.mutex.guard()?;
        // SAFETY: the mutex is held
        unsafe { *self.signaled.get() = true };
        self.cond.signal()
    }

    /// Consumes the signal, `None` waits forever
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.cond.wait_for_state(&self.mutex, timeout, || {
            // SAFETY: wait_for_state runs us with the mutex held
            let signaled = unsafe { &mut *self.signaled.get() };
            std::mem::replace(signaled, false)
        })
    }
}
