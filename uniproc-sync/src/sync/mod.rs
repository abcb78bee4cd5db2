//! # Blocking synchronization primitives.
//!
//! The runtime only offers the [`SpinLock`], which keeps interrupts disabled
//! for as long as it is held. That is fine for a handful of instructions, but
//! a thread that has to wait for another thread must give up the cpu instead.
//! The primitives of this module do so by parking the waiting thread and
//! letting whoever ends the wait unpark it.
//!
//! | Primitive      | Blocks Thread? | Wake order | Typical Use Case                      |
//! |----------------|----------------|------------|---------------------------------------|
//! | [`SpinLock`]   | No             | -          | Short critical sections of the runtime |
//! | [`Lock`]       | Yes            | FIFO       | Exclusive access to shared data        |
//! | [`Condition`]  | Yes            | FIFO       | Waiting for a predicate on locked data |
//! | [`Semaphore`]  | Yes            | Mesa       | Limiting access to a bounded resource  |
//!
//! Each primitive is built from the one above it: a [`Condition`] is bound to
//! a [`Lock`], and a [`Semaphore`] is a permit count behind a lock with a
//! condition to sleep on.
//!
//! [`SpinLock`]: uniproc::sync::SpinLock

pub mod condition;
pub mod lock;
pub mod semaphore;

pub use condition::Condition;
pub use lock::{Lock, LockGuard};
pub use semaphore::{Semaphore, SemaphorePermits};
