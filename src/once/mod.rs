//! # One-time gate
//!
//! Double-checked locking:
//! - fast path: an Acquire load of `ran`, true => the action is done and its effects are visible
//! - slow path: take the lock, look at `ran` again, run the action, Release-store `ran`
//!
//! The Release store pairs with the Acquire load => whoever sees `ran == true` also sees everything the action did.
//!
//! `ran` is set after the action, never before. An action that fails (an `Err` from [OnceGate::try_run] or a panic)
//! leaves the gate closed, the next caller runs it again.

use std::{
    sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
    thread,
};

use log::debug;

use crate::{error::SyncError, guard::LockGuard, locks::ExclusiveLock};

pub struct OnceGate {
    ran: AtomicBool,
    lock: ExclusiveLock,
}

impl OnceGate {
    pub fn new() -> Result<Self, SyncError> {
        Ok(Self {
            ran: AtomicBool::new(false),
            lock: ExclusiveLock::new()?,
        })
    }

    /// Runs `action` unless somebody has already done it. Concurrent callers wait for the first one.
    /// Calling it again from inside `action` is [SyncError::DeadlockWouldOccur].
    pub fn run(&self, action: impl FnOnce()) -> Result<(), SyncError> {
        self.try_run(|| {
            action();
            Ok::<(), SyncError>(())
        })
    }

    /// Like [OnceGate::run], but an `Err` from `action` keeps the gate closed for a retry
    pub fn try_run<E, F>(&self, action: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<SyncError>,
    {
        if self.ran.load(Acquire) {
            return Ok(());
        }

        // released on unwind as well, a panicking action doesn't wedge the gate
        let _guard = LockGuard::new(&self.lock)?;
        // the lock orders it against the store below
        if self.ran.load(Relaxed) {
            return Ok(());
        }

        action()?;
        self.ran.store(true, Release);
        debug!("once gate passed");
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.ran.load(Acquire)
    }
}

impl std::fmt::Debug for OnceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceGate")
            .field("ran", &self.is_completed())
            .finish()
    }
}

/// `workers` threads rush the same gate, one of them gets through
pub fn run(workers: usize) -> Result<(), SyncError> {
    let gate = OnceGate::new()?;
    let runs = AtomicUsize::new(0);

    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(|| {
                    gate.run(|| {
                        runs.fetch_add(1, Relaxed);
                        println!("initializing from {:?}", thread::current().id());
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .try_for_each(|h| match h.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
    })?;

    println!(
        "{workers} callers, the action ran {} time(s)",
        runs.load(Relaxed)
    );
    Ok(())
}
