//! # Semaphore.
//!
//! A **semaphore** counts the permits left for a limited resource. A thread
//! takes a permit with [`Semaphore::wait`], sleeping while none is left, and
//! gives it back with [`Semaphore::signal`].
//!
//! The semaphore is built from a [`Lock`] over the permit count and a
//! [`Condition`] that waiters sleep on. Since wakeups follow Mesa semantics, a
//! woken waiter re-checks the count before taking a permit: a thread that
//! calls [`Semaphore::wait`] right after a signal may take the permit first,
//! and the woken waiter then goes back to sleep.
//!
//! A semaphore initialized with zero permits works as an event: the waiting
//! thread blocks until another thread signals.
//!
//! ```rust,ignore
//! let sema = Semaphore::new(3, state); // Up to 3 threads may use `state`.
//!
//! let permit = sema.wait();
//! permit.work(); // Call a method defined on the `state`.
//! drop(permit); // Gives the permit back.
//! ```
use super::{condition::Condition, lock::Lock};
use core::ops::Deref;

/// Counting semaphore.
///
/// A semaphore maintains a set of permits and resource. Unlike a [`Lock`], it
/// can let more than one thread access the resource at a time.
pub struct Semaphore<T> {
    resource: T,
    permits: Lock<usize>,
    available: Condition,
}

impl<T> Semaphore<T> {
    /// Creates a new semaphore with `permits` available permits, guarding
    /// `resource`.
    pub fn new(permits: usize, resource: T) -> Self {
        let permits = Lock::new(permits);
        let available = Condition::new(&permits);
        Self {
            resource,
            permits,
            available,
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// The permit is given back when the returned [`SemaphorePermits`] is
    /// dropped.
    pub fn wait(&self) -> SemaphorePermits<'_, T> {
        let mut permits = self
            .available
            .sleep_while(self.permits.acquire(), |permits| *permits == 0);
        *permits -= 1;
        permits.release();
        SemaphorePermits { sema: self }
    }

    /// Releases a permit back to the semaphore, waking up one waiter if any.
    ///
    /// Normally this is only called directly to signal an event on a
    /// semaphore created with zero permits.
    pub fn signal(&self) {
        let mut permits = self.permits.acquire();
        *permits += 1;
        self.available.wake(&permits);
        permits.release();
    }

    /// Number of permits currently available.
    pub fn available_permits(&self) -> usize {
        let permits = self.permits.acquire();
        let n = *permits;
        permits.release();
        n
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
///
/// The resource guarded by the semaphore is reachable through [`Deref`].
///
/// This structure is created by the [`wait`] method on [`Semaphore`].
///
/// [`wait`]: Semaphore::wait
pub struct SemaphorePermits<'a, T> {
    sema: &'a Semaphore<T>,
}

impl<T> Deref for SemaphorePermits<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.sema.resource
    }
}

impl<T> Drop for SemaphorePermits<'_, T> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}
