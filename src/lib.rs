//! # Locks and monitors
//! Mutex, condition variable and one-time gate built directly on OS primitives,
//! for places where the runtime's own are missing or broken.
//!
//! - [locks] - a recursive OS lock and the single-owner mutex on top of it
//! - [guard] - scope-bound unlocking for any of the locks
//! - [monitor] - the condition variable, the part with the actual concurrency hazards
//! - [once] - run something exactly once
//! - [os] - pthread plumbing: mutex, condition, counting semaphore, wake event

pub mod config;
pub mod error;
pub mod guard;
pub mod locks;
pub mod monitor;
pub mod once;
pub mod os;

pub use config::MonitorConfig;
pub use error::SyncError;
pub use guard::{LockGuard, LockMode, ScopedGuard};
pub use locks::{ExclusiveLock, Lockable, ReentrantLock};
pub use monitor::{WaitStatus, WaitableMonitor};
pub use once::OnceGate;
