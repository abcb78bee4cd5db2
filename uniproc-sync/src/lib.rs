//! # uniproc-sync: blocking synchronization for uniproc threads
//!
//! This crate builds the blocking synchronization primitives of a
//! uniprocessor kernel on top of the [`uniproc`] runtime:
//!
//! - [`Lock`]: mutual exclusion with owner tracking and FIFO hand-off.
//! - [`Condition`]: a condition variable bound to one [`Lock`].
//! - [`Semaphore`]: a counting semaphore made of a lock and a condition.
//! - [`Alarm`]: sleeping until the virtual clock reaches a deadline.
//! - [`Communicator`]: a rendezvous channel exchanging one word between one
//!   speaker and one listener.
//!
//! The runtime offers two ways of making code atomic: disabling interrupts
//! with an [`InterruptGuard`] and parking the running thread with
//! [`Current::park_with`]. Every primitive here is made of these two and of
//! the primitives listed before it.
//!
//! ## Testing
//!
//! The test cases live in the `sync-grader` crate. Run them all with
//! `cargo test`, or through the grading binary:
//!
//! ```bash
//! $ cd uniproc-sync/grader
//! $ cargo run -- communicator::speaker_first
//! ```
//!
//! [`InterruptGuard`]: uniproc::interrupt::InterruptGuard
//! [`Current::park_with`]: uniproc::thread::Current::park_with
#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod alarm;
pub mod communicator;
pub mod sync;

pub use alarm::Alarm;
pub use communicator::Communicator;
pub use sync::{Condition, Lock, LockGuard, Semaphore, SemaphorePermits};
