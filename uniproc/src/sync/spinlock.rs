//! Uniprocessor spinlock.
//!
//! On a single cpu, holding a spinlock simply means running with interrupts
//! disabled: no other thread can be scheduled until the lock is released.
//! Contention therefore cannot be resolved by spinning. A thread that finds
//! the lock taken would spin forever, so it is reported as a deadlock.

use crate::interrupt::InterruptGuard;
use core::{
    cell::{Cell, UnsafeCell},
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, PartialEq, Eq)]
pub struct WouldBlock;

thread_local! {
    static HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of spinlocks held by the current thread.
pub(crate) fn held() -> usize {
    HELD.with(|held| held.get())
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`], which guarantees that the data is only ever accessed
/// when the spinlock is locked. Guards must be released with
/// [`SpinLockGuard::unlock`].
///
/// A thread must not park while holding a spinlock.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            data: UnsafeCell::new(t),
            locked: AtomicBool::new(false),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires a spinlock.
    ///
    /// Interrupts stay disabled until the returned guard is unlocked.
    ///
    /// # Panics
    ///
    /// Panics if the lock is already held. On a uniprocessor the holder can
    /// never run again to release it.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        match self.try_lock() {
            Ok(guard) => guard,
            Err(WouldBlock) => panic!("Deadlock: spinlock is already held."),
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// # Errors
    ///
    /// If the spinlock could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = InterruptGuard::new();
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(WouldBlock);
        }
        HELD.with(|held| held.set(held.get() + 1));
        Ok(SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
        })
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a spinlock. When this structure
/// is dropped (falls out of scope) without unlock, panic occurs.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`SpinLock`].
///
/// [`lock`]: SpinLock::lock
/// [`try_lock`]: SpinLock::try_lock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<InterruptGuard>,
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    pub fn unlock(mut self) {
        self.release();
        core::mem::forget(self);
    }

    fn release(&mut self) {
        self.lock.locked.store(false, Ordering::SeqCst);
        HELD.with(|held| held.set(held.get() - 1));
        // Re-enabling interrupts may preempt; the lock must already be free.
        self.guard.take();
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.release();
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_reports_contention() {
        std::thread::spawn(|| {
            let lock = SpinLock::new(1);
            let mut guard = lock.lock();
            *guard += 1;
            assert_eq!(held(), 1);
            assert!(lock.try_lock().is_err());
            guard.unlock();
            assert_eq!(held(), 0);
            let guard = lock.try_lock().unwrap();
            assert_eq!(*guard, 2);
            guard.unlock();
            assert_eq!(lock.into_inner(), 2);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn dropping_a_locked_guard_panics() {
        let r = std::thread::spawn(|| {
            let lock = SpinLock::new(());
            let _guard = lock.lock();
        })
        .join();
        assert!(r.is_err());
    }
}
