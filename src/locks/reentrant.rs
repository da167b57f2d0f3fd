use crate::{
    error::SyncError,
    os::{MutexKind, PthreadMutex},
};

use super::Lockable;

/// OS-backed recursive lock without any owner bookkeeping of its own.
///
/// lock / unlock pairs from one thread nest. Unlocking from a thread that isn't
/// the holder comes back as [SyncError::OperationNotPermitted].
pub struct ReentrantLock {
    raw: PthreadMutex,
}

impl ReentrantLock {
    pub fn new() -> Result<Self, SyncError> {
        Ok(Self {
            raw: PthreadMutex::new(MutexKind::Recursive)?,
        })
    }
}

impl Lockable for ReentrantLock {
    fn lock(&self) -> Result<(), SyncError> {
        self.raw.lock()
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        self.raw.try_lock()
    }

    fn unlock(&self) -> Result<(), SyncError> {
        self.raw.unlock()
    }
}

impl std::fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantLock").finish_non_exhaustive()
    }
}
