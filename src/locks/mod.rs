//! # Locks
//!
//! Two flavours on top of the same recursive pthread mutex:
//! - [ReentrantLock] - the holder may lock again, other threads wait until it unwinds to zero depth
//! - [ExclusiveLock] - a single owner, locking twice from the same thread is an error
//!
//! The exclusive one is the "mutex". It narrows the recursive primitive down with an `owned` flag:
//! only the thread that passed the OS lock can see the flag set, so a set flag after locking means self re-entry.
//! PTHREAD_MUTEX_ERRORCHECK could do the same, but this way the diagnostic doesn't depend on the platform.
//!
//! There are no guards baked in here, the lock and unlock calls are explicit.
//! See [crate::guard] for the RAII part.

use log::{info, warn};

use crate::error::SyncError;

mod exclusive;
mod reentrant;

pub use exclusive::ExclusiveLock;
pub use reentrant::ReentrantLock;

/// Anything with an explicit lock / unlock pair.
/// The monitor and the guards work with any of these.
pub trait Lockable {
    /// Blocks until the lock is taken
    fn lock(&self) -> Result<(), SyncError>;

    /// Ok(false) means it's held elsewhere
    fn try_lock(&self) -> Result<bool, SyncError>;

    /// The caller must hold the lock
    fn unlock(&self) -> Result<(), SyncError>;
}

/// Walks through lock misuse and how each lock reports it
pub fn run() -> Result<(), SyncError> {
    let reentrant = ReentrantLock::new()?;
    reentrant.lock()?;
    reentrant.lock()?;
    info!("reentrant lock taken twice by the same thread");
    reentrant.unlock()?;
    reentrant.unlock()?;

    let mutex = ExclusiveLock::new()?;
    mutex.lock()?;
    match mutex.lock() {
        Err(e) => println!("second lock from the same thread: {e}"),
        Ok(()) => warn!("exclusive lock let the same thread in twice"),
    }
    mutex.unlock()?;
    match mutex.unlock() {
        Err(e) => println!("unlock without owning it: {e}"),
        Ok(()) => warn!("exclusive lock unlocked twice"),
    }
    Ok(())
}
