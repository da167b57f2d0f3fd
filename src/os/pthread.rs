//! # pthread wrappers
//! The C objects rely on a constant memory address, Rust moves objects a lot => each one lives in a [Box].
//! Interior mutability rules for the C type come from [UnsafeCell].
//!
//! Destroying a locked mutex is UB by POSIX. glibc reports EBUSY instead, so Drop leaks the handle
//! in that case rather than pulling the memory from under a thread that may still use it.

use std::{cell::UnsafeCell, mem::MaybeUninit, time::Duration};

use log::warn;

use super::{deadline_after, WaitOutcome};
use crate::error::{check, SyncError};

#[cfg(not(target_vendor = "apple"))]
pub(crate) const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
// no pthread_condattr_setclock there, timed waits go by the wall clock
#[cfg(target_vendor = "apple")]
pub(crate) const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    /// double-locking from one thread deadlocks
    Normal,
    /// the holder may lock again, others wait until it unwinds to zero depth
    Recursive,
}

pub struct PthreadMutex {
    m: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// the whole point of the type is to be shared between threads
unsafe impl Send for PthreadMutex {}
unsafe impl Sync for PthreadMutex {}

impl PthreadMutex {
    pub fn new(kind: MutexKind) -> Result<Self, SyncError> {
        let m = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let kind = match kind {
            MutexKind::Normal => libc::PTHREAD_MUTEX_NORMAL,
            MutexKind::Recursive => libc::PTHREAD_MUTEX_RECURSIVE,
        };
        // SAFETY: attr is initialized before use and destroyed right after the mutex has been set up
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check(
                "pthread_mutexattr_init",
                libc::pthread_mutexattr_init(attr.as_mut_ptr()),
            )?;
            let mut rc = libc::pthread_mutexattr_settype(attr.as_mut_ptr(), kind);
            if rc == 0 {
                rc = libc::pthread_mutex_init(m.get(), attr.as_ptr());
            }
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            check("pthread_mutex_init", rc)?;
        }
        Ok(Self { m })
    }

    pub fn lock(&self) -> Result<(), SyncError> {
        // SAFETY: the mutex was initialized in new and stays at its address
        check("pthread_mutex_lock", unsafe {
            libc::pthread_mutex_lock(self.m.get())
        })
    }

    /// Ok(false) means somebody else holds it
    pub fn try_lock(&self) -> Result<bool, SyncError> {
        // SAFETY: see lock
        match unsafe { libc::pthread_mutex_trylock(self.m.get()) } {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            code => Err(SyncError::from_errno("pthread_mutex_trylock", code)),
        }
    }

    pub fn unlock(&self) -> Result<(), SyncError> {
        // SAFETY: see lock. Recursive mutexes check the owner and return EPERM for strangers
        check("pthread_mutex_unlock", unsafe {
            libc::pthread_mutex_unlock(self.m.get())
        })
    }

    /// Locks and hands out a guard that unlocks on drop
    pub fn guard(&self) -> Result<PthreadGuard<'_>, SyncError> {
        self.lock()?;
        Ok(PthreadGuard { mutex: self })
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.m.get()
    }
}

impl Drop for PthreadMutex {
    fn drop(&mut self) {
        // SAFETY: nobody can borrow us anymore, but a forgotten lock may still be held
        let rc = unsafe { libc::pthread_mutex_destroy(self.m.get()) };
        if rc != 0 {
            warn!("pthread_mutex_destroy failed with errno {rc}, leaking the handle");
            let still_locked = std::mem::replace(
                &mut self.m,
                Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER)),
            );
            std::mem::forget(still_locked);
        }
    }
}

/// Proof that the [PthreadMutex] is held, needed to wait on a [PthreadCond]
pub struct PthreadGuard<'a> {
    mutex: &'a PthreadMutex,
}

impl Drop for PthreadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            warn!("internal mutex unlock failed: {e}");
        }
    }
}

pub struct PthreadCond {
    c: Box<UnsafeCell<libc::pthread_cond_t>>,
}

unsafe impl Send for PthreadCond {}
unsafe impl Sync for PthreadCond {}

impl PthreadCond {
    pub fn new() -> Result<Self, SyncError> {
        let c = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: same dance as for the mutex attributes
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check(
                "pthread_condattr_init",
                libc::pthread_condattr_init(attr.as_mut_ptr()),
            )?;
            #[cfg(not(target_vendor = "apple"))]
            let rc = libc::pthread_condattr_setclock(attr.as_mut_ptr(), WAIT_CLOCK);
            #[cfg(target_vendor = "apple")]
            let rc = 0;
            let rc = if rc == 0 {
                libc::pthread_cond_init(c.get(), attr.as_ptr())
            } else {
                rc
            };
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            check("pthread_cond_init", rc)?;
        }
        Ok(Self { c })
    }

    pub fn signal(&self) -> Result<(), SyncError> {
        check("pthread_cond_signal", unsafe {
            libc::pthread_cond_signal(self.c.get())
        })
    }

    pub fn broadcast(&self) -> Result<(), SyncError> {
        check("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.c.get())
        })
    }

    /// Waits for `ready` to report true, `None` waits forever.
    ///
    /// `ready` runs with the mutex held, so it may consume the state it checks.
    /// It gets one last look after the deadline passes, a signal racing the timeout isn't lost.
    pub fn wait_for_state(
        &self,
        mutex: &PthreadMutex,
        timeout: Option<Duration>,
        mut ready: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let guard = match mutex.guard() {
            Ok(g) => g,
            Err(e) => return WaitOutcome::Failed(e),
        };
        let deadline = timeout.map(deadline_after);
        let mut timed_out = false;
        loop {
            if ready() {
                return WaitOutcome::Signaled;
            }
            if timed_out {
                return WaitOutcome::TimedOut;
            }
            // SAFETY: the guard proves the mutex is held by us
            let rc = match &deadline {
                None => unsafe { libc::pthread_cond_wait(self.c.get(), guard.mutex.raw()) },
                Some(at) => unsafe {
                    libc::pthread_cond_timedwait(self.c.get(), guard.mutex.raw(), at)
                },
            };
            match rc {
                0 => {}
                libc::ETIMEDOUT => timed_out = true,
                code => {
                    return WaitOutcome::Failed(SyncError::from_errno("pthread_cond_wait", code))
                }
            }
        }
    }
}

impl Drop for PthreadCond {
    fn drop(&mut self) {
        // SAFETY: &mut self => no waiters left
        let rc = unsafe { libc::pthread_cond_destroy(self.c.get()) };
        if rc != 0 {
            warn!("pthread_cond_destroy failed with errno {rc}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread::scope;

    use super::*;

    #[test]
    fn test_recursive_nesting() {
        let m = PthreadMutex::new(MutexKind::Recursive).unwrap();
        m.lock().unwrap();
        m.lock().unwrap();
        assert!(m.try_lock().unwrap());

        // another thread can't pass until all 3 levels are unwound
        scope(|s| {
            assert!(!s.spawn(|| m.try_lock().unwrap()).join().unwrap());
        });
        m.unlock().unwrap();
        m.unlock().unwrap();
        m.unlock().unwrap();
        scope(|s| {
            s.spawn(|| {
                assert!(m.try_lock().unwrap());
                m.unlock().unwrap();
            });
        });
    }

    #[test]
    fn test_recursive_unlock_by_stranger() {
        let m = PthreadMutex::new(MutexKind::Recursive).unwrap();
        m.lock().unwrap();
        scope(|s| {
            let r = s.spawn(|| m.unlock()).join().unwrap();
            assert_eq!(r, Err(SyncError::OperationNotPermitted));
        });
        m.unlock().unwrap();
    }

    #[test]
    fn test_wait_for_state_times_out() {
        let m = PthreadMutex::new(MutexKind::Normal).unwrap();
        let c = PthreadCond::new().unwrap();
        let outcome = c.wait_for_state(&m, Some(Duration::from_millis(10)), || false);
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // the mutex was released on the way out
        assert!(m.try_lock().unwrap());
        m.unlock().unwrap();
    }

    #[test]
    fn test_wait_for_state_ready_immediately() {
        let m = PthreadMutex::new(MutexKind::Normal).unwrap();
        let c = PthreadCond::new().unwrap();
        assert_eq!(
            c.wait_for_state(&m, Some(Duration::ZERO), || true),
            WaitOutcome::Signaled
        );
    }
}
