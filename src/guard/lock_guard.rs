use log::warn;

use crate::{error::SyncError, locks::Lockable};

/// Holds the lock from construction till drop, nothing in between
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, L: Lockable + ?Sized> {
    lock: &'a L,
}

impl<'a, L: Lockable + ?Sized> LockGuard<'a, L> {
    pub fn new(lock: &'a L) -> Result<Self, SyncError> {
        lock.lock()?;
        Ok(Self { lock })
    }

    /// The caller promises it holds `lock` already
    pub fn adopt(lock: &'a L) -> Self {
        Self { lock }
    }
}

impl<L: Lockable + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        // there's nobody to return the error to
        if let Err(e) = self.lock.unlock() {
            warn!("LockGuard failed to release its lock: {e}");
        }
    }
}
