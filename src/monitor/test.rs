use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Mutex,
    },
    thread::{scope, sleep, yield_now},
    time::{Duration, Instant},
};

use proptest::{collection::vec, prelude::*};

use super::*;

const LONG: Duration = Duration::from_secs(10);

fn wait_for_waiters(monitor: &WaitableMonitor, n: usize) {
    let started = Instant::now();
    while monitor.waiter_count() < n {
        assert!(started.elapsed() < LONG, "waiters never showed up");
        yield_now();
    }
}

fn quick_monitor() -> WaitableMonitor {
    WaitableMonitor::with_config(
        MonitorConfig::default()
            .with_name("test")
            .with_poll_interval(Duration::from_millis(20))
            .with_max_rendezvous_polls(500),
    )
    .unwrap()
}

#[test]
fn test_notify_one_wakes_exactly_one() {
    const N: usize = 5;
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let woken = AtomicUsize::new(0);

    scope(|s| {
        for _ in 0..N {
            s.spawn(|| {
                let guard = ScopedGuard::new(&mutex).unwrap();
                assert_eq!(monitor.wait_for(&guard, LONG).unwrap(), WaitStatus::Woken);
                woken.fetch_add(1, SeqCst);
            });
        }
        wait_for_waiters(&monitor, N);

        monitor.notify_one();
        // the rendezvous is over => exactly one left the blocking step
        assert_eq!(monitor.waiter_count(), N - 1);

        sleep(Duration::from_millis(50));
        assert_eq!(woken.load(SeqCst), 1);
        assert_eq!(monitor.waiter_count(), N - 1);

        monitor.notify_all();
    });
    assert_eq!(woken.load(SeqCst), N);
    assert_eq!(monitor.pending_units(), 0);
}

#[test]
fn test_notify_all_returns_after_every_waiter_left() {
    const N: usize = 8;
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let woken = AtomicUsize::new(0);

    scope(|s| {
        for _ in 0..N {
            s.spawn(|| {
                let guard = ScopedGuard::new(&mutex).unwrap();
                if monitor.wait_for(&guard, LONG).unwrap() == WaitStatus::Woken {
                    woken.fetch_add(1, SeqCst);
                }
            });
        }
        wait_for_waiters(&monitor, N);

        monitor.notify_all();
        // no race window: every one of them is past the semaphore already
        assert_eq!(monitor.waiter_count(), 0);
        assert_eq!(monitor.pending_units(), 0);
    });
    assert_eq!(woken.load(SeqCst), N);
}

#[test]
fn test_many_waiters_outnumber_the_poll_cap() {
    // every acknowledgement may wake the notifier on its own, only idle polls count
    const N: usize = 64;
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = WaitableMonitor::with_config(
        MonitorConfig::default()
            .with_name("crowded")
            .with_poll_interval(Duration::from_millis(200))
            .with_max_rendezvous_polls(2),
    )
    .unwrap();
    let woken = AtomicUsize::new(0);

    scope(|s| {
        for _ in 0..N {
            s.spawn(|| {
                let guard = ScopedGuard::new(&mutex).unwrap();
                assert_eq!(monitor.wait_for(&guard, LONG).unwrap(), WaitStatus::Woken);
                woken.fetch_add(1, SeqCst);
            });
        }
        wait_for_waiters(&monitor, N);

        monitor.notify_all();
        assert_eq!(monitor.waiter_count(), 0);
    });
    assert_eq!(woken.load(SeqCst), N);
}

#[test]
fn test_failed_semaphore_wait_is_fatal_despite_relock_error() {
    let monitor = quick_monitor();
    if fatal::test::in_child() {
        let _ = monitor.settle(
            WaitOutcome::Failed(SyncError::Os {
                op: "pthread_cond_wait",
                code: libc::EINVAL,
            }),
            Err(SyncError::OperationNotPermitted),
        );
        unreachable!("settle returned after a failed wait");
    }

    // the relock error alone is an ordinary error
    assert_eq!(
        monitor.settle(WaitOutcome::Signaled, Err(SyncError::OperationNotPermitted)),
        Err(SyncError::OperationNotPermitted)
    );
    assert_eq!(
        monitor.settle(WaitOutcome::TimedOut, Ok(())),
        Ok(WaitStatus::TimedOut)
    );

    let stderr = fatal::test::assert_aborted(&fatal::test::run_in_child(
        "monitor::test::test_failed_semaphore_wait_is_fatal_despite_relock_error",
    ));
    assert!(stderr.contains("fatal error in test at src/monitor/test.rs:"), "{stderr}");
    assert!(stderr.contains("blocking on the semaphore failed"), "{stderr}");
}

#[test]
fn test_notify_without_waiters_is_lost() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    monitor.notify_one();
    monitor.notify_all();
    assert_eq!(monitor.pending_units(), 0);

    let guard = ScopedGuard::new(&mutex).unwrap();
    let status = monitor
        .wait_for(&guard, Duration::from_millis(20))
        .unwrap();
    assert_eq!(status, WaitStatus::TimedOut);
}

#[test]
fn test_zero_timeout_returns_quickly() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let guard = ScopedGuard::new(&mutex).unwrap();

    let started = Instant::now();
    assert_eq!(
        monitor.wait_for(&guard, Duration::ZERO).unwrap(),
        WaitStatus::TimedOut
    );
    assert!(started.elapsed() < Duration::from_millis(50));
    // relocked on the way out
    assert!(guard.owns_lock());
    assert!(mutex.is_locked());

    assert!(monitor.wait_for_millis(&guard, -5).unwrap().timed_out());
    assert!(monitor
        .wait_until(&guard, Instant::now() - Duration::from_millis(5))
        .unwrap()
        .timed_out());
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(monitor.waiter_count(), 0);
}

#[test]
fn test_handoff_ordering() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let events = Mutex::new(Vec::new());

    scope(|s| {
        let a = s.spawn(|| {
            let guard = ScopedGuard::new(&mutex).unwrap();
            let status = monitor.wait_for(&guard, LONG).unwrap();
            assert!(guard.owns_lock());
            events.lock().unwrap().push("A resumed holding M");
            status
        });

        wait_for_waiters(&monitor, 1);
        let held = LockGuard::new(&mutex).unwrap();
        monitor.notify_one();
        events.lock().unwrap().push("B notified");
        events.lock().unwrap().push("B released M");
        drop(held);

        assert_eq!(a.join().unwrap(), WaitStatus::Woken);
    });

    assert_eq!(
        *events.lock().unwrap(),
        ["B notified", "B released M", "A resumed holding M"]
    );
}

#[test]
fn test_wait_with_predicate() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let value = AtomicUsize::new(0);
    let wakeups = AtomicUsize::new(0);

    scope(|s| {
        s.spawn(|| {
            for i in 1..=3 {
                wait_for_waiters(&monitor, 1);
                let _held = LockGuard::new(&mutex).unwrap();
                value.store(i, SeqCst);
                monitor.notify_all();
            }
        });

        let guard = ScopedGuard::new(&mutex).unwrap();
        monitor
            .wait_with(&guard, || {
                wakeups.fetch_add(1, SeqCst);
                value.load(SeqCst) == 3
            })
            .unwrap();
        assert!(guard.owns_lock());
    });

    // woken for 1 and 2 as well, the predicate sent it back to sleep
    assert_eq!(value.load(SeqCst), 3);
    assert_eq!(wakeups.load(SeqCst), 4);
}

#[test]
fn test_timed_predicate_waits() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let guard = ScopedGuard::new(&mutex).unwrap();

    let started = Instant::now();
    let held = monitor
        .wait_for_with(&guard, Duration::from_millis(30), || false)
        .unwrap();
    assert!(!held);
    assert!(started.elapsed() >= Duration::from_millis(30));

    assert!(monitor
        .wait_until_with(&guard, Instant::now() + LONG, || true)
        .unwrap());
    assert!(!monitor
        .wait_until_with(&guard, Instant::now(), || false)
        .unwrap());
}

#[test]
fn test_timed_predicate_sees_late_change() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let flag = AtomicBool::new(false);

    scope(|s| {
        s.spawn(|| {
            wait_for_waiters(&monitor, 1);
            let _held = LockGuard::new(&mutex).unwrap();
            flag.store(true, SeqCst);
            monitor.notify_one();
        });

        let guard = ScopedGuard::new(&mutex).unwrap();
        assert!(monitor
            .wait_for_with(&guard, LONG, || flag.load(SeqCst))
            .unwrap());
    });
}

#[test]
fn test_works_with_plain_locks() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    mutex.lock().unwrap();
    assert!(monitor
        .wait_for(&mutex, Duration::from_millis(5))
        .unwrap()
        .timed_out());
    assert!(mutex.is_locked());
    mutex.unlock().unwrap();

    let reentrant = ReentrantLock::new().unwrap();
    reentrant.lock().unwrap();
    assert!(monitor
        .wait_for(&reentrant, Duration::ZERO)
        .unwrap()
        .timed_out());
    reentrant.unlock().unwrap();
}

#[test]
fn test_wait_without_holding_the_lock() {
    let mutex = ExclusiveLock::new().unwrap();
    let monitor = quick_monitor();
    let guard = ScopedGuard::deferred(&mutex);
    assert_eq!(
        monitor.wait_for(&guard, Duration::ZERO),
        Err(SyncError::OperationNotPermitted)
    );
    // the failed attempt didn't leave a ghost waiter behind
    assert_eq!(monitor.waiter_count(), 0);
    monitor.notify_one();
}

#[test]
fn test_rejects_bad_config() {
    let config = MonitorConfig::default().with_poll_interval(Duration::ZERO);
    assert!(matches!(
        WaitableMonitor::with_config(config),
        Err(SyncError::InvalidConfig(_))
    ));
}

#[test]
fn test_independent_instances() {
    let mutex = ExclusiveLock::new().unwrap();
    let first = quick_monitor();
    let second = quick_monitor();

    scope(|s| {
        let waiter = s.spawn(|| {
            let guard = ScopedGuard::new(&mutex).unwrap();
            first.wait_for(&guard, LONG).unwrap()
        });
        wait_for_waiters(&first, 1);
        second.notify_all();
        assert_eq!(first.waiter_count(), 1);
        first.notify_one();
        assert_eq!(waiter.join().unwrap(), WaitStatus::Woken);
    });
}

/// Waiters with short random timeouts race a notifier for `cycles` rounds each.
/// Returns (woken, timed out).
fn race(
    monitor: &WaitableMonitor,
    timeouts: &[u64],
    cycles: usize,
    notify_all: bool,
) -> (usize, usize) {
    let mutex = ExclusiveLock::new().unwrap();
    let woken = AtomicUsize::new(0);
    let timed_out = AtomicUsize::new(0);
    let finished = AtomicUsize::new(0);

    scope(|s| {
        for &ms in timeouts {
            let (mutex, woken, timed_out, finished) = (&mutex, &woken, &timed_out, &finished);
            s.spawn(move || {
                for _ in 0..cycles {
                    let guard = ScopedGuard::new(mutex).unwrap();
                    match monitor.wait_for(&guard, Duration::from_millis(ms)).unwrap() {
                        WaitStatus::Woken => woken.fetch_add(1, SeqCst),
                        WaitStatus::TimedOut => timed_out.fetch_add(1, SeqCst),
                    };
                }
                finished.fetch_add(1, SeqCst);
            });
        }

        while finished.load(SeqCst) < timeouts.len() {
            if notify_all {
                monitor.notify_all();
            } else {
                monitor.notify_one();
            }
            sleep(Duration::from_micros(300));
        }
    });

    (woken.load(SeqCst), timed_out.load(SeqCst))
}

fn assert_no_stale_units(monitor: &WaitableMonitor) {
    assert_eq!(monitor.waiter_count(), 0);
    assert_eq!(monitor.pending_units(), 0);

    // an unrelated waiter later on isn't woken by anything left from the race
    let mutex = ExclusiveLock::new().unwrap();
    let guard = ScopedGuard::new(&mutex).unwrap();
    assert_eq!(
        monitor.wait_for(&guard, Duration::from_millis(20)).unwrap(),
        WaitStatus::TimedOut
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn timeouts_racing_notify_all_leave_no_units(
        timeouts in vec(0u64..4, 2..10),
        cycles in 5usize..30,
    ) {
        let monitor = quick_monitor();
        let (woken, timed_out) = race(&monitor, &timeouts, cycles, true);
        prop_assert_eq!(woken + timed_out, timeouts.len() * cycles);
        assert_no_stale_units(&monitor);
    }

    #[test]
    fn timeouts_racing_notify_one_leave_no_units(
        timeouts in vec(0u64..4, 2..10),
        cycles in 5usize..30,
    ) {
        let monitor = quick_monitor();
        let (woken, timed_out) = race(&monitor, &timeouts, cycles, false);
        prop_assert_eq!(woken + timed_out, timeouts.len() * cycles);
        assert_no_stale_units(&monitor);
    }
}
