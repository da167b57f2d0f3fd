//! # Waitable monitor
//!
//! The condition variable: unlock a lock, block, relock it on the way out. Built from a counting semaphore
//! and a wake event, with a signed waiter count in between.
//!
//! A single semaphore can't tell "a wakeup was issued" from "a waiter actually took it".
//! A waiter timing out right when a unit is released for it leaves the unit behind,
//! and the next unrelated waiter wakes up from it. So:
//!
//! 1. [WaitableMonitor::wait] registers in the count (under the private lock), unlocks, takes a unit or times out,
//!    leaves the count, signals the event - in every case, then relocks.
//! 2. notify releases units, then keeps the private lock and polls the event until the count drops to what it expects.
//!    That's the rendezvous: notify doesn't return before the waiters it released are out of the blocking step.
//! 3. Once nobody is left, leftover units are drained. New waiters can't register meanwhile - the private lock is taken.
//!
//! notify with no waiters is a no-op, nothing is remembered for a future waiter.
//!
//! ## Memory ordering
//! The count is SeqCst. It's the single piece of state notifiers make decisions on,
//! and it's touched a couple of times per wait - nothing to optimize there.
//!
//! ## Fatal conditions
//! A failing blocking call, or [MonitorConfig::max_rendezvous_polls] polls in a row in which no waiter
//! acknowledged, means the bookkeeping is broken => [fatal::terminate].

use std::{
    sync::atomic::{
        AtomicBool, AtomicIsize,
        Ordering::{Relaxed, SeqCst},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace};

use crate::{
    config::MonitorConfig,
    error::SyncError,
    guard::{LockGuard, ScopedGuard},
    locks::{ExclusiveLock, Lockable, ReentrantLock},
    os::{Semaphore, WaitOutcome, WakeEvent},
};

pub mod fatal;
pub mod timeout;

/// How a timed wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Woken,
    TimedOut,
}

impl WaitStatus {
    pub fn timed_out(self) -> bool {
        self == Self::TimedOut
    }
}

pub struct WaitableMonitor {
    semaphore: Semaphore,
    wake_event: WakeEvent,
    /// threads between registering in wait and leaving its blocking step
    waiters: AtomicIsize,
    /// serializes notifiers against each other and against waiters registering
    notify_lock: ReentrantLock,
    config: MonitorConfig,
}

impl WaitableMonitor {
    pub fn new() -> Result<Self, SyncError> {
        Self::with_config(MonitorConfig::default())
    }

    pub fn with_config(config: MonitorConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            semaphore: Semaphore::new(0, config.semaphore_capacity)?,
            wake_event: WakeEvent::new()?,
            waiters: AtomicIsize::new(0),
            notify_lock: ReentrantLock::new()?,
            config,
        })
    }

    pub fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or("unnamed monitor")
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Threads blocked in one of the waits right now
    pub fn waiter_count(&self) -> usize {
        usize::try_from(self.waiters.load(SeqCst)).unwrap_or(0)
    }

    /// Unlocks `lock`, waits for a notify, locks it back.
    /// The caller must hold `lock`.
    #[track_caller]
    pub fn wait<L: Lockable + ?Sized>(&self, lock: &L) -> Result<(), SyncError> {
        self.wait_impl(lock, None).map(|_| ())
    }

    /// Waits until `predicate` holds. Wakeups may be spurious with respect to it, hence the loop
    #[track_caller]
    pub fn wait_with<L, P>(&self, lock: &L, mut predicate: P) -> Result<(), SyncError>
    where
        L: Lockable + ?Sized,
        P: FnMut() -> bool,
    {
        while !predicate() {
            self.wait(lock)?;
        }
        Ok(())
    }

    #[track_caller]
    pub fn wait_for<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Duration,
    ) -> Result<WaitStatus, SyncError> {
        self.wait_impl(lock, Some(timeout::clamp(timeout)))
    }

    /// [WaitableMonitor::wait_for] for callers with a signed millisecond count
    #[track_caller]
    pub fn wait_for_millis<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        millis: i64,
    ) -> Result<WaitStatus, SyncError> {
        self.wait_impl(lock, Some(timeout::from_millis(millis)))
    }

    /// Returns the last look at `predicate` - true if it held before the timeout ran out
    #[track_caller]
    pub fn wait_for_with<L, P>(
        &self,
        lock: &L,
        timeout: Duration,
        mut predicate: P,
    ) -> Result<bool, SyncError>
    where
        L: Lockable + ?Sized,
        P: FnMut() -> bool,
    {
        let started = Instant::now();
        let timeout = timeout::clamp(timeout);
        while !predicate() {
            let left = timeout.saturating_sub(started.elapsed());
            if self.wait_impl(lock, Some(left))?.timed_out() {
                return Ok(predicate());
            }
        }
        Ok(true)
    }

    /// A deadline in the past is a zero timeout
    #[track_caller]
    pub fn wait_until<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        deadline: Instant,
    ) -> Result<WaitStatus, SyncError> {
        self.wait_impl(lock, Some(timeout::remaining(deadline)))
    }

    #[track_caller]
    pub fn wait_until_with<L, P>(
        &self,
        lock: &L,
        deadline: Instant,
        mut predicate: P,
    ) -> Result<bool, SyncError>
    where
        L: Lockable + ?Sized,
        P: FnMut() -> bool,
    {
        while !predicate() {
            if self.wait_until(lock, deadline)?.timed_out() {
                return Ok(predicate());
            }
        }
        Ok(true)
    }

    /// Wakes one waiter and returns once it's out of the blocking step.
    /// Which one is up to the semaphore, there's no FIFO.
    #[track_caller]
    pub fn notify_one(&self) {
        let _serial = self.serialize();
        let target = self.waiters.load(SeqCst) - 1;
        if target < 0 {
            trace!("{}: notify_one with nobody waiting", self.name());
            return;
        }
        if let Err(e) = self.semaphore.release(1) {
            fatal::terminate(self.name(), format_args!("semaphore release failed: {e}"));
        }
        self.rendezvous(target);
    }

    /// Wakes every thread waiting at the time of the call.
    /// Returns once all of them are out of the blocking step.
    #[track_caller]
    pub fn notify_all(&self) {
        let _serial = self.serialize();
        let waiters = self.waiters.load(SeqCst);
        if waiters < 0 {
            fatal::terminate(
                self.name(),
                format_args!("waiter count is negative ({waiters})"),
            );
        }
        if waiters == 0 {
            trace!("{}: notify_all with nobody waiting", self.name());
            return;
        }
        let units = u32::try_from(waiters).unwrap_or(u32::MAX);
        if let Err(e) = self.semaphore.release(units) {
            fatal::terminate(
                self.name(),
                format_args!("releasing {units} semaphore units failed: {e}"),
            );
        }
        self.rendezvous(0);
    }

    #[track_caller]
    fn wait_impl<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Option<Duration>,
    ) -> Result<WaitStatus, SyncError> {
        {
            let _serial = LockGuard::new(&self.notify_lock)?;
            self.waiters.fetch_add(1, SeqCst);
        }

        if let Err(e) = lock.unlock() {
            self.waiters.fetch_sub(1, SeqCst);
            // a notifier may have counted us already
            self.acknowledge();
            return Err(e);
        }

        let outcome = self.semaphore.wait(timeout);
        self.waiters.fetch_sub(1, SeqCst);
        self.acknowledge();

        let relocked = lock.lock();
        self.settle(outcome, relocked)
    }

    /// A failed semaphore wait is fatal even when relocking failed as well
    #[track_caller]
    fn settle(
        &self,
        outcome: WaitOutcome,
        relocked: Result<(), SyncError>,
    ) -> Result<WaitStatus, SyncError> {
        let status = match outcome {
            WaitOutcome::Signaled => WaitStatus::Woken,
            WaitOutcome::TimedOut => WaitStatus::TimedOut,
            WaitOutcome::Failed(e) => fatal::terminate(
                self.name(),
                format_args!("blocking on the semaphore failed: {e}"),
            ),
        };
        relocked.map(|_| status)
    }

    /// Lets a notifier polling the wake event re-check the count
    #[track_caller]
    fn acknowledge(&self) {
        if let Err(e) = self.wake_event.set() {
            fatal::terminate(self.name(), format_args!("wake event signal failed: {e}"));
        }
    }

    #[track_caller]
    fn serialize(&self) -> LockGuard<'_, ReentrantLock> {
        match LockGuard::new(&self.notify_lock) {
            Ok(guard) => guard,
            Err(e) => fatal::terminate(
                self.name(),
                format_args!("private lock acquisition failed: {e}"),
            ),
        }
    }

    /// Polls until the count is down to `target` and the released units are taken.
    ///
    /// Below target is fine too - waiters that time out concurrently leave on their own.
    /// A unit released for a waiter that timed out instead is taken by one of the remaining waiters
    /// or, once nobody is left, drained. Either way no unit outlives the notify.
    #[track_caller]
    fn rendezvous(&self, target: isize) {
        let mut polls = 0u32;
        // consecutive polls that ran out with nobody acknowledging
        let mut idle_polls = 0;
        loop {
            let current = self.waiters.load(SeqCst);
            if current < 0 {
                fatal::terminate(
                    self.name(),
                    format_args!("waiter count went negative ({current})"),
                );
            }
            if current == 0 {
                self.drain();
                debug!("{}: rendezvous done after {polls} polls", self.name());
                return;
            }
            if current <= target && self.pending_units() == 0 {
                debug!(
                    "{}: rendezvous done after {polls} polls, {current} waiters left",
                    self.name()
                );
                return;
            }
            if idle_polls == self.config.max_rendezvous_polls {
                fatal::terminate(
                    self.name(),
                    format_args!(
                        "{current} waiters still registered after {idle_polls} idle polls, \
                         expected {target}"
                    ),
                );
            }
            polls += 1;
            match self.wake_event.wait(Some(self.config.poll_interval)) {
                // a waiter left, the clock starts over
                WaitOutcome::Signaled => idle_polls = 0,
                WaitOutcome::TimedOut => idle_polls += 1,
                WaitOutcome::Failed(e) => fatal::terminate(
                    self.name(),
                    format_args!("waiting on the wake event failed: {e}"),
                ),
            }
        }
    }

    /// Only with the private lock held and nobody registered
    #[track_caller]
    fn drain(&self) {
        let mut drained = 0u32;
        loop {
            match self.semaphore.try_acquire() {
                Ok(true) => drained += 1,
                Ok(false) => break,
                Err(e) => {
                    fatal::terminate(self.name(), format_args!("draining the semaphore failed: {e}"))
                }
            }
        }
        if drained > 0 {
            debug!("{}: drained {drained} stale semaphore units", self.name());
        }
    }

    /// Units released but not taken yet
    #[track_caller]
    fn pending_units(&self) -> u32 {
        match self.semaphore.available() {
            Ok(units) => units,
            Err(e) => fatal::terminate(
                self.name(),
                format_args!("reading the semaphore count failed: {e}"),
            ),
        }
    }
}

impl std::fmt::Debug for WaitableMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitableMonitor")
            .field("name", &self.name())
            .field("waiters", &self.waiters.load(SeqCst))
            .field("capacity", &self.semaphore.max())
            .finish()
    }
}

/// Thread A waits holding the mutex, thread B takes it, notifies and lets go
pub fn handoff() -> Result<(), SyncError> {
    let mutex = ExclusiveLock::new()?;
    let monitor = WaitableMonitor::with_config(MonitorConfig::default().with_name("handoff"))?;
    // the mutex orders it, the atomic only keeps the borrow checker happy
    let ready = AtomicBool::new(false);

    thread::scope(|s| -> Result<(), SyncError> {
        let guard = ScopedGuard::new(&mutex)?;
        let notifier = s.spawn(|| -> Result<(), SyncError> {
            while monitor.waiter_count() == 0 {
                thread::yield_now();
            }
            let _held = LockGuard::new(&mutex)?;
            ready.store(true, Relaxed);
            println!("B: notifying");
            monitor.notify_one();
            println!("B: releasing the mutex");
            Ok(())
        });

        println!("A: waiting");
        monitor.wait_with(&guard, || ready.load(Relaxed))?;
        println!("A: resumed holding the mutex");
        drop(guard);
        join(notifier)
    })?;

    info!("handoff finished");
    Ok(())
}

/// `waiters` threads block, one notify_all lets every one of them go
pub fn broadcast(waiters: usize) -> Result<(), SyncError> {
    let mutex = ExclusiveLock::new()?;
    let monitor = WaitableMonitor::with_config(MonitorConfig::default().with_name("broadcast"))?;

    thread::scope(|s| -> Result<(), SyncError> {
        let handles: Vec<_> = (0..waiters)
            .map(|_| {
                s.spawn(|| -> Result<(), SyncError> {
                    let guard = ScopedGuard::new(&mutex)?;
                    monitor.wait(&guard)
                })
            })
            .collect();

        while monitor.waiter_count() < waiters {
            thread::yield_now();
        }
        println!("{waiters} threads waiting, notifying all");
        monitor.notify_all();
        println!(
            "notify_all returned, {} still waiting",
            monitor.waiter_count()
        );

        handles.into_iter().try_for_each(join)
    })
}

/// A panicking demo thread takes the demo down with it
fn join<T>(handle: thread::ScopedJoinHandle<'_, Result<T, SyncError>>) -> Result<T, SyncError> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod test;
