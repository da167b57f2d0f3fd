use std::cell::Cell;

use log::warn;

use super::LockMode;
use crate::{error::SyncError, locks::Lockable};

/// A movable guard that may or may not hold its lock at any given moment.
///
/// It's [Lockable] itself, so a monitor can unlock and relock through it
/// and the `owns` flag stays in step. That's why `owns` sits in a [Cell]:
/// the trait works on `&self`. The guard is `!Sync` as a result, which is fine,
/// only the thread holding the lock has business with it.
#[must_use = "a guard that owns its lock releases it as soon as it's dropped"]
pub struct ScopedGuard<'a, L: Lockable + ?Sized> {
    lock: Option<&'a L>,
    owns: Cell<bool>,
}

impl<'a, L: Lockable + ?Sized> ScopedGuard<'a, L> {
    /// Blocks until `lock` is taken
    pub fn new(lock: &'a L) -> Result<Self, SyncError> {
        Self::with_mode(lock, LockMode::Acquire)
    }

    pub fn with_mode(lock: &'a L, mode: LockMode) -> Result<Self, SyncError> {
        let owns = match mode {
            LockMode::Acquire => {
                lock.lock()?;
                true
            }
            LockMode::Adopt => true,
            LockMode::Defer => false,
            LockMode::Try => lock.try_lock()?,
        };
        Ok(Self {
            lock: Some(lock),
            owns: Cell::new(owns),
        })
    }

    /// The caller already holds `lock`
    pub fn adopt(lock: &'a L) -> Self {
        Self {
            lock: Some(lock),
            owns: Cell::new(true),
        }
    }

    pub fn deferred(lock: &'a L) -> Self {
        Self {
            lock: Some(lock),
            owns: Cell::new(false),
        }
    }

    /// Check [ScopedGuard::owns_lock] to see if it worked
    pub fn try_new(lock: &'a L) -> Result<Self, SyncError> {
        Self::with_mode(lock, LockMode::Try)
    }

    /// A guard with no lock behind it, every lock operation is refused
    pub fn empty() -> Self {
        Self {
            lock: None,
            owns: Cell::new(false),
        }
    }

    pub fn owns_lock(&self) -> bool {
        self.owns.get()
    }

    pub fn lockable(&self) -> Option<&'a L> {
        self.lock
    }

    /// Cuts the guard loose without unlocking. Whatever it owned is the caller's problem now.
    pub fn release(&mut self) -> Option<&'a L> {
        self.owns.set(false);
        self.lock.take()
    }

    fn target(&self) -> Result<&'a L, SyncError> {
        self.lock.ok_or(SyncError::OperationNotPermitted)
    }
}

impl<L: Lockable + ?Sized> Lockable for ScopedGuard<'_, L> {
    fn lock(&self) -> Result<(), SyncError> {
        let lock = self.target()?;
        if self.owns.get() {
            return Err(SyncError::DeadlockWouldOccur);
        }
        lock.lock()?;
        self.owns.set(true);
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        let lock = self.target()?;
        if self.owns.get() {
            return Err(SyncError::DeadlockWouldOccur);
        }
        let taken = lock.try_lock()?;
        self.owns.set(taken);
        Ok(taken)
    }

    fn unlock(&self) -> Result<(), SyncError> {
        if !self.owns.get() {
            return Err(SyncError::OperationNotPermitted);
        }
        self.target()?.unlock()?;
        self.owns.set(false);
        Ok(())
    }
}

impl<L: Lockable + ?Sized> Default for ScopedGuard<'_, L> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<L: Lockable + ?Sized> Drop for ScopedGuard<'_, L> {
    fn drop(&mut self) {
        if self.owns.get() {
            if let Err(e) = self.unlock() {
                warn!("ScopedGuard failed to release its lock: {e}");
            }
        }
    }
}

impl<L: Lockable + ?Sized> std::fmt::Debug for ScopedGuard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedGuard")
            .field("has_lock", &self.lock.is_some())
            .field("owns", &self.owns.get())
            .finish()
    }
}
