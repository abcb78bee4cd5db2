use grading::{assert_exit_code, grade, wait_for_state, yield_n};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use uniproc::{
    sync::WouldBlock,
    thread::{Current, ThreadBuilder, ThreadState, get_state_by_tid},
};
use uniproc_sync::Lock;

#[grade]
pub fn smoke() {
    const LENGTH: usize = 64;
    let output = Arc::new(Lock::new(Vec::new()));
    let counter = Arc::new(AtomicUsize::new(0));

    let handles = (0..LENGTH)
        .map(|i| {
            let (output, counter) = (output.clone(), counter.clone());
            ThreadBuilder::new("smoker").spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut d = output.acquire();
                while counter.load(Ordering::SeqCst) != LENGTH {
                    Current::yield_now();
                }
                d.push(i);
                d.release();
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }

    let mut output = output.acquire();
    output.sort();
    assert_eq!(*output, (0..LENGTH).collect::<Vec<_>>());
    output.release();
}

#[grade]
pub fn parking() {
    let lock = Arc::new(Lock::new(()));
    let guard = lock.acquire();

    let blockee = {
        let lock = lock.clone();
        ThreadBuilder::new("blockee").spawn(move || lock.acquire().release())
    };
    wait_for_state(blockee.tid, ThreadState::Parked);
    yield_n(100);
    assert_eq!(
        get_state_by_tid(blockee.tid),
        Ok(ThreadState::Parked),
        "Blocked thread by Lock should be in Parked state"
    );

    guard.release();
    assert_eq!(blockee.join(), 0);
}

#[grade(timer_interval = 20)]
pub fn mutual_exclusion() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    let lock = Arc::new(Lock::new(0usize));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles = (0..THREADS)
        .map(|i| {
            let (lock, inside) = (lock.clone(), inside.clone());
            ThreadBuilder::new(format!("worker{i}")).spawn(move || {
                for round in 0..ROUNDS {
                    let mut count = lock.acquire();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    let v = *count;
                    if round % 3 == i % 3 {
                        Current::yield_now();
                    }
                    *count = v + 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    count.release();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }

    let count = lock.acquire();
    assert_eq!(*count, THREADS * ROUNDS);
    count.release();
}

#[grade]
pub fn fifo_handoff() {
    const WAITERS: usize = 8;
    let lock = Arc::new(Lock::new(Vec::new()));
    let guard = lock.acquire();

    let handles = (0..WAITERS)
        .map(|i| {
            let lock = lock.clone();
            let handle = ThreadBuilder::new(format!("waiter{i}")).spawn(move || {
                let mut order = lock.acquire();
                order.push(i);
                order.release();
            });
            wait_for_state(handle.tid, ThreadState::Parked);
            handle
        })
        .collect::<Vec<_>>();

    guard.release();
    // The lock already belongs to the first waiter.
    assert!(lock.try_acquire().is_err());
    assert!(!lock.is_held_by_current_thread());

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    let order = lock.acquire();
    assert_eq!(*order, (0..WAITERS).collect::<Vec<_>>());
    order.release();
}

#[grade]
pub fn try_acquire() {
    let lock = Arc::new(Lock::new(0));
    let guard = lock.try_acquire().expect("free lock must be acquired");
    assert!(lock.is_held_by_current_thread());
    assert!(matches!(lock.try_acquire(), Err(WouldBlock)));

    let other = {
        let lock = lock.clone();
        ThreadBuilder::new("other").spawn(move || {
            assert!(matches!(lock.try_acquire(), Err(WouldBlock)));
            assert!(!lock.is_held_by_current_thread());
        })
    };
    assert_eq!(other.join(), 0);
    guard.release();
    assert!(!lock.is_held_by_current_thread());

    let other = {
        let lock = lock.clone();
        ThreadBuilder::new("other").spawn(move || {
            let mut value = lock.try_acquire().expect("released lock must be acquired");
            *value += 1;
            value.release();
        })
    };
    assert_eq!(other.join(), 0);

    let value = lock.acquire();
    assert_eq!(*value, 1);
    value.release();
}

#[grade]
pub fn into_inner() {
    let lock = Lock::new(vec![1]);
    let mut v = lock.acquire();
    v.push(2);
    v.release();
    assert_eq!(lock.into_inner(), vec![1, 2]);
}

#[grade]
#[assert_exit_code(-1)]
pub fn recursive_acquire() {
    let lock = Lock::new(());
    let _guard = lock.acquire();
    let _again = lock.acquire();
}
