use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use log::warn;

use super::{Lockable, ReentrantLock};
use crate::error::SyncError;

/// The mutex: one owner at a time, the owner locking again is a usage error.
pub struct ExclusiveLock {
    driver: ReentrantLock,
    /// Relaxed is enough - written only under the driver lock, which already orders it
    owned: AtomicBool,
}

impl ExclusiveLock {
    pub fn new() -> Result<Self, SyncError> {
        Ok(Self {
            driver: ReentrantLock::new()?,
            owned: AtomicBool::new(false),
        })
    }

    /// Somebody is between lock and unlock right now.
    /// Only a hint for anyone but the owner.
    pub fn is_locked(&self) -> bool {
        self.owned.load(Relaxed)
    }

    /// Called with the driver held one level deeper than before
    fn claim(&self, op: &str) -> Result<(), SyncError> {
        // a different thread can't pass the driver while it's owned => it's us, again
        if self.owned.load(Relaxed) {
            self.driver.unlock()?;
            warn!("ExclusiveLock::{op}: the owning thread tried to lock it again");
            return Err(SyncError::DeadlockWouldOccur);
        }
        self.owned.store(true, Relaxed);
        Ok(())
    }
}

impl Lockable for ExclusiveLock {
    fn lock(&self) -> Result<(), SyncError> {
        self.driver.lock()?;
        self.claim("lock")
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        if !self.driver.try_lock()? {
            return Ok(false);
        }
        self.claim("try_lock")?;
        Ok(true)
    }

    fn unlock(&self) -> Result<(), SyncError> {
        // the driver is recursive => only its holder gets one level deeper without blocking
        if !self.driver.try_lock()? {
            warn!("ExclusiveLock::unlock from a thread that doesn't own it");
            return Err(SyncError::OperationNotPermitted);
        }
        // the driver is ours now, the flag tells whether it was before
        if !self.owned.load(Relaxed) {
            self.driver.unlock()?;
            warn!("ExclusiveLock::unlock on a lock nobody owns");
            return Err(SyncError::OperationNotPermitted);
        }
        self.owned.store(false, Relaxed);
        self.driver.unlock()?;
        self.driver.unlock()
    }
}

impl std::fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("owned", &self.is_locked())
            .finish()
    }
}
