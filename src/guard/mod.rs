//! # Guards
//! Locking explicitly is error-prone: an early return or a panic in between leaves the lock held forever.
//! A guard ties the unlock to a scope instead.
//!
//! - [LockGuard] - the simple one, always holds the lock for its whole life
//! - [ScopedGuard] - may or may not hold the lock, can lock and unlock in between, can be moved around
//!
//! A guard only borrows its lock. The lock has to outlive the guard, the compiler checks that for us.
//!
//! Moving a guard moves the duty to unlock: the moved-from place is gone as far as Rust is concerned,
//! so only one of them can ever drop.

mod lock_guard;
mod scoped;

pub use lock_guard::LockGuard;
pub use scoped::ScopedGuard;

/// How a [ScopedGuard] treats its lock when it's created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// block until the lock is taken
    Acquire,
    /// the caller already holds it, just take over the unlock
    Adopt,
    /// don't touch it yet
    Defer,
    /// one non-blocking attempt, the guard may end up not owning the lock
    Try,
}
