//! # Lock.
//!
//! A lock allows **only one thread at a time** to run a critical section.
//! Unlike the [`SpinLock`], which holds the cpu with interrupts disabled for
//! as long as it is locked, a [`Lock`] can be held across preemption and
//! **blocks** threads that try to acquire it while another thread holds it.
//!
//! The [`Lock`] tracks its holder and keeps the threads sleeping on it in a
//! FIFO queue. Releasing the lock hands it directly to the first sleeper,
//! which already owns the lock when it wakes up. A thread that arrives later
//! can therefore never steal a lock from a thread that has been waiting.
//!
//! |                | SpinLock                  | Lock                     |
//! |----------------|---------------------------|--------------------------|
//! | Waiting thread | Impossible (interrupts off) | Sleeps                 |
//! | Preemptible    | No                        | Yes                      |
//! | Owner tracking | No                        | Yes                      |
//!
//! Using a lock incorrectly is a bug in the caller, not a recoverable
//! condition: acquiring a lock twice from the same thread, or releasing a
//! lock held by someone else, panics.
//!
//! [`SpinLock`]: uniproc::sync::SpinLock

use alloc::collections::vec_deque::VecDeque;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};
use uniproc::{
    sync::{SpinLock, WouldBlock},
    thread::{Current, ParkHandle},
};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

struct LockState {
    holder: Option<u64>,
    waiters: VecDeque<ParkHandle>,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This lock will block threads waiting for the lock to become available.
/// The data can only be accessed through the guards returned from
/// [`acquire`] and [`try_acquire`], which guarantees that the data is only
/// ever accessed when the lock is held.
///
/// [`acquire`]: Self::acquire
/// [`try_acquire`]: Self::try_acquire
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use uniproc::thread::ThreadBuilder;
/// use uniproc_sync::Lock;
///
/// let data = Arc::new(Lock::new(0));
///
/// for _ in 0..10 {
///     let data = Arc::clone(&data);
///     ThreadBuilder::new("work").spawn(move || {
///         let mut data = data.acquire();
///         *data += 1;
///         data.release();
///     });
/// }
/// ```
pub struct Lock<T> {
    id: u64,
    state: SpinLock<LockState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Lock<T> {}
unsafe impl<T: Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    /// Creates a new lock in an unlocked state ready for use.
    pub fn new(t: T) -> Lock<T> {
        Lock {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            state: SpinLock::new(LockState {
                holder: None,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(t),
        }
    }

    /// Acquires the lock, blocking the current thread until it is able to do
    /// so.
    ///
    /// Upon returning, the thread is the only thread with the lock held.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the lock.
    pub fn acquire(&self) -> LockGuard<'_, T> {
        let tid = Current::get_tid();
        let mut state = self.state.lock();
        let holder = state.holder;
        match holder {
            None => {
                state.holder = Some(tid);
                state.unlock();
            }
            Some(holder) if holder == tid => {
                state.unlock();
                panic!("Lock is already held by the current thread.");
            }
            Some(_) => {
                // The releasing thread makes us the holder before waking us up.
                Current::park_with(move |handle| {
                    state.waiters.push_back(handle);
                    state.unlock();
                });
            }
        }
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not block, so it is safe to call from a timer
    /// interrupt handler.
    ///
    /// # Errors
    ///
    /// If the lock is held, by any thread including the current one, this
    /// call returns the [`WouldBlock`] error.
    pub fn try_acquire(&self) -> Result<LockGuard<'_, T>, WouldBlock> {
        let tid = Current::get_tid();
        let mut state = self.state.lock();
        if state.holder.is_some() {
            state.unlock();
            return Err(WouldBlock);
        }
        state.holder = Some(tid);
        state.unlock();
        Ok(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Returns true if the current thread holds this lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        let tid = Current::get_tid();
        let state = self.state.lock();
        let held = state.holder == Some(tid);
        state.unlock();
        held
    }

    /// Consumes this lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn release(&self) {
        let tid = Current::get_tid();
        let mut state = self.state.lock();
        if state.holder != Some(tid) {
            state.unlock();
            panic!("Lock is released by a thread that does not hold it.");
        }
        let next = state.waiters.pop_front();
        state.holder = next.as_ref().map(ParkHandle::tid);
        if let Some(next) = next {
            next.unpark();
        }
        state.unlock();
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Lock<T> {
        Lock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a [`Lock`]. The lock is released
/// when this structure is dropped or when [`release`] is called.
///
/// The data protected by the lock can be accessed through this guard.
///
/// [`release`]: LockGuard::release
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for LockGuard<'_, T> {}

impl<'a, T> LockGuard<'a, T> {
    /// Releases the underlying [`Lock`].
    ///
    /// If threads are waiting for the lock, the first of them becomes the new
    /// holder and is made runnable.
    pub fn release(self) {
        drop(self)
    }

    /// The lock this guard holds.
    pub(crate) fn lock_of(this: &Self) -> &'a Lock<T> {
        this.lock
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
