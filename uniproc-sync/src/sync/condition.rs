//! # Condition Variable.
//!
//! A **Condition Variable** lets a thread block until some state guarded by a
//! [`Lock`] changes, without consuming cpu time. Every [`Condition`] is bound
//! to one lock at construction, and all its operations take a guard of that
//! lock as proof that the caller holds it. Passing the guard of another lock
//! panics.
//!
//! [`Condition::sleep`] releases the lock and parks the caller as one atomic
//! step: interrupts stay disabled from the moment the caller joins the wait
//! queue until it has left the cpu, so a [`Condition::wake`] issued right
//! after the lock is released cannot be lost.
//!
//! Wakeups follow Mesa semantics. A woken thread is only made runnable. By
//! the time it has reacquired the lock the state may have changed again, so
//! callers re-check their predicate in a loop, or let
//! [`Condition::sleep_while`] do it for them:
//!
//! ```rust,ignore
//! let guard = cond.sleep_while(lock.acquire(), |queue| queue.is_empty());
//! ```
use super::lock::{Lock, LockGuard};
use alloc::collections::vec_deque::VecDeque;
use uniproc::{
    interrupt::InterruptGuard,
    sync::SpinLock,
    thread::{Current, ParkHandle},
};

/// A Condition Variable
///
/// Threads sleeping on the condition are woken in the order they went to
/// sleep.
pub struct Condition {
    lock: u64,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl Condition {
    /// Creates a new condition variable associated with `lock`.
    ///
    /// The condition remembers which lock it belongs to, but does not keep it
    /// alive.
    pub fn new<T>(lock: &Lock<T>) -> Self {
        Self {
            lock: lock.id(),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    #[track_caller]
    fn check<T>(&self, guard: &LockGuard<'_, T>) {
        let lock = LockGuard::lock_of(guard);
        assert_eq!(
            lock.id(),
            self.lock,
            "Condition is used with a lock it is not associated with."
        );
        assert!(
            lock.is_held_by_current_thread(),
            "Condition is used without holding its lock."
        );
    }

    /// Atomically releases the lock and sleeps until woken, then reacquires
    /// the lock.
    ///
    /// # Panics
    ///
    /// Panics if `guard` does not belong to the associated lock.
    #[track_caller]
    pub fn sleep<'a, T>(&self, guard: LockGuard<'a, T>) -> LockGuard<'a, T> {
        self.check(&guard);
        let lock = LockGuard::lock_of(&guard);
        let _p = InterruptGuard::new();
        Current::park_with(|handle| {
            let mut waiters = self.waiters.lock();
            waiters.push_back(handle);
            waiters.unlock();
            guard.release();
        });
        lock.acquire()
    }

    /// Sleeps while `predicate` returns `true` on the guarded data.
    ///
    /// The predicate is checked before the first sleep and after every wakeup,
    /// always with the lock held.
    #[track_caller]
    pub fn sleep_while<'a, T>(
        &self,
        mut guard: LockGuard<'a, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> LockGuard<'a, T> {
        while predicate(&mut *guard) {
            guard = self.sleep(guard);
        }
        guard
    }

    /// Wakes up the longest-sleeping thread, if any.
    ///
    /// The woken thread becomes runnable but does not run before the caller
    /// releases the cpu. Returns `false` if no thread was sleeping. Calls to
    /// `wake` are not buffered in any way.
    #[track_caller]
    pub fn wake<T>(&self, guard: &LockGuard<'_, T>) -> bool {
        self.check(guard);
        let mut waiters = self.waiters.lock();
        let next = waiters.pop_front();
        let woken = next.is_some();
        if let Some(next) = next {
            next.unpark();
        }
        waiters.unlock();
        woken
    }

    /// Wakes up all sleeping threads in the order they went to sleep.
    ///
    /// Returns the number of threads woken.
    #[track_caller]
    pub fn wake_all<T>(&self, guard: &LockGuard<'_, T>) -> usize {
        self.check(guard);
        let mut waiters = self.waiters.lock();
        let woken = waiters.len();
        for waiter in waiters.drain(..) {
            waiter.unpark();
        }
        waiters.unlock();
        woken
    }

    /// Number of threads sleeping on this condition.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let n = waiters.len();
        waiters.unlock();
        n
    }
}
