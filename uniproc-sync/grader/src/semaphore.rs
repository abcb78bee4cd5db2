use grading::{grade, wait_for_state, yield_n};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};
use uniproc::thread::{Current, JoinHandle, ThreadBuilder, ThreadState};
use uniproc_sync::{Lock, Semaphore};

/// Let every runnable thread run until it blocks or exits.
fn settle() {
    yield_n(100);
}

#[grade]
pub fn sema_0() {
    let sema = Arc::new(Semaphore::new(0, ()));
    let is_thread_active = Arc::new(AtomicBool::new(false));
    let is_woken_up = Arc::new(AtomicBool::new(false));

    let thread = {
        let (sema, is_thread_active, is_woken_up) =
            (sema.clone(), is_thread_active.clone(), is_woken_up.clone());

        ThreadBuilder::new("worker").spawn(move || {
            is_thread_active.store(true, Ordering::SeqCst);
            sema.wait();
            is_woken_up.store(true, Ordering::SeqCst);
        })
    };

    while !is_thread_active.load(Ordering::SeqCst) {
        Current::yield_now();
    }
    wait_for_state(thread.tid, ThreadState::Parked);
    assert!(!is_woken_up.load(Ordering::SeqCst));

    sema.signal();
    assert_eq!(thread.join(), 0);

    assert!(is_woken_up.load(Ordering::SeqCst));
}

fn sema_n(permits: u32) {
    const COUNT: u32 = 16;
    let sema = Arc::new(Semaphore::new(permits as usize, ()));
    let ready_counter = Arc::new(AtomicU32::new(0));
    let counter = Arc::new(AtomicU32::new(0));

    for i in 0..COUNT {
        let (sema, ready_counter, counter) =
            (sema.clone(), ready_counter.clone(), counter.clone());

        ThreadBuilder::new(format!("t{i}")).spawn(move || {
            ready_counter.fetch_add(1, Ordering::SeqCst);

            let sema_permit = sema.wait();
            counter.fetch_add(1, Ordering::SeqCst);
            core::mem::forget(sema_permit);
        });
    }

    while ready_counter.load(Ordering::SeqCst) < COUNT {
        Current::yield_now();
    }
    settle();

    let mut expected_cnt = permits;
    assert_eq!(counter.load(Ordering::SeqCst), expected_cnt);

    while counter.load(Ordering::SeqCst) < COUNT {
        expected_cnt += permits;
        for _ in 0..permits {
            sema.signal();
        }
        settle();

        assert_eq!(counter.load(Ordering::SeqCst), expected_cnt);
    }
}

#[grade]
pub fn sema_1() {
    sema_n(1);
}

#[grade]
pub fn sema_2() {
    sema_n(2);
}

#[grade]
pub fn exec_order() {
    const COUNT: usize = 3;

    let counter = Arc::new(AtomicUsize::new(0));
    let sema = Arc::new(Semaphore::new(0, 0));

    let handles = (0..COUNT)
        .map(|i| {
            let counter = counter.clone();
            let sema = sema.clone();
            ThreadBuilder::new(format!("support_{i}")).spawn(move || {
                let _guard = sema.wait();
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect::<Vec<JoinHandle>>();

    for handle in handles.iter() {
        wait_for_state(handle.tid, ThreadState::Parked);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    sema.signal();
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(counter.load(Ordering::SeqCst), COUNT);
}

#[grade]
pub fn n_permits() {
    const COUNT: usize = 5;
    const PERMITS: usize = 3;

    let counter = Arc::new(AtomicUsize::new(0));
    let sema = Arc::new(Semaphore::new(PERMITS, 0));
    let lock = Arc::new(Lock::new(0));

    let guard = lock.acquire();

    let handles = (0..COUNT)
        .map(|i| {
            let counter = counter.clone();
            let sema = sema.clone();
            let lock = lock.clone();
            ThreadBuilder::new(format!("support_{i}")).spawn(move || {
                let _guard = sema.wait();
                counter.fetch_add(1, Ordering::SeqCst);
                let _lock = lock.acquire();
                _lock.release();
            })
        })
        .collect::<Vec<JoinHandle>>();

    for handle in handles.iter() {
        wait_for_state(handle.tid, ThreadState::Parked);
    }
    assert_eq!(counter.load(Ordering::SeqCst), PERMITS);
    assert_eq!(sema.available_permits(), 0);
    guard.release();

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(counter.load(Ordering::SeqCst), COUNT);
    assert_eq!(sema.available_permits(), PERMITS);
}

#[grade]
pub fn permits_guard_resource() {
    let sema = Semaphore::new(2, String::from("resource"));
    let first = sema.wait();
    let second = sema.wait();
    assert_eq!(first.as_str(), "resource");
    assert_eq!(sema.available_permits(), 0);
    drop(first);
    assert_eq!(sema.available_permits(), 1);
    drop(second);
    assert_eq!(sema.available_permits(), 2);
}
