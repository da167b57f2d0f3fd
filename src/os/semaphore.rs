//! Bounded counting semaphore.
//!
//! Release never blocks and refuses to go past the bound, wait takes exactly one unit.

use std::{cell::UnsafeCell, time::Duration};

use super::{MutexKind, PthreadCond, PthreadMutex, WaitOutcome};
use crate::error::SyncError;

pub struct Semaphore {
    mutex: PthreadMutex,
    available: PthreadCond,
    /// only touched with the mutex held
    count: UnsafeCell<u32>,
    max: u32,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new(initial: u32, max: u32) -> Result<Self, SyncError> {
        if initial > max {
            return Err(SyncError::InvalidConfig(
                "semaphore initial count exceeds its bound",
            ));
        }
        Ok(Self {
            mutex: PthreadMutex::new(MutexKind::Normal)?,
            available: PthreadCond::new()?,
            count: UnsafeCell::new(initial),
            max,
        })
    }

    /// Takes one unit, `None` waits forever
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.available.wait_for_state(&self.mutex, timeout, || {
            // SAFETY: wait_for_state runs us with the mutex held
            let count = unsafe { &mut *self.count.get() };
            if *count > 0 {
                *count -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Takes one unit if there's any, never blocks on the count
    pub fn try_acquire(&self) -> Result<bool, SyncError> {
        let _guard = self.mutex.guard()?;
        // SAFETY: the mutex is held
        let count = unsafe { &mut *self.count.get() };
        if *count == 0 {
            return Ok(false);
        }
        *count -= 1;
        Ok(true)
    }

    /// Adds `units`, failing with EOVERFLOW without touching the count if that would pass the bound
    pub fn release(&self, units: u32) -> Result<(), SyncError> {
        if units == 0 {
            return Ok(());
        }
        let _guard = self.mutex.guard()?;
        // SAFETY: the mutex is held
        let count = unsafe { &mut *self.count.get() };
        match count.checked_add(units) {
            Some(next) if next <= self.max => *count = next,
            _ => {
                return Err(SyncError::Os {
                    op: "semaphore release",
                    code: libc::EOVERFLOW,
                })
            }
        }
        if units == 1 {
            self.available.signal()
        } else {
            self.available.broadcast()
        }
    }

    /// Units released but not yet taken
    pub fn available(&self) -> Result<u32, SyncError> {
        let _guard = self.mutex.guard()?;
        // SAFETY: the mutex is held
        Ok(unsafe { *self.count.get() })
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
