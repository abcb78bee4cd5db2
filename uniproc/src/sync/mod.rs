//! Low-level synchronization.
//!
//! Blocking primitives are built by the users of this crate on top of
//! [`SpinLock`] and [`Current::park_with`].
//!
//! [`Current::park_with`]: crate::thread::Current::park_with
pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
