use grading::{assert_exit_code, grade, wait_for_state};
use std::{collections::VecDeque, sync::Arc};
use uniproc::thread::{ThreadBuilder, ThreadState};
use uniproc_sync::{Condition, Lock};

const CAPACITY: usize = 2;

struct Buffer {
    items: Lock<VecDeque<usize>>,
    not_full: Condition,
    not_empty: Condition,
}

impl Buffer {
    fn new() -> Self {
        let items = Lock::new(VecDeque::new());
        let not_full = Condition::new(&items);
        let not_empty = Condition::new(&items);
        Self {
            items,
            not_full,
            not_empty,
        }
    }

    fn put(&self, val: usize) {
        let mut guard = self
            .not_full
            .sleep_while(self.items.acquire(), |items| items.len() == CAPACITY);
        guard.push_back(val);
        self.not_empty.wake(&guard);
        guard.release();
    }

    fn get(&self) -> usize {
        let mut guard = self
            .not_empty
            .sleep_while(self.items.acquire(), |items| items.is_empty());
        let item = guard.pop_front().expect("buffer is not empty");
        self.not_full.wake(&guard);
        guard.release();
        item
    }
}

fn bounded_buffer(n_producers: usize, n_consumers: usize, per_producer: usize) {
    let buffer = Arc::new(Buffer::new());
    let output = Arc::new(Lock::new(Vec::new()));
    let total = n_producers * per_producer;
    assert_eq!(total % n_consumers, 0);

    let consumers = (0..n_consumers)
        .map(|_| {
            let (buffer, output) = (buffer.clone(), output.clone());
            let n = total / n_consumers;
            ThreadBuilder::new("consumer").spawn(move || {
                for _ in 0..n {
                    let d = buffer.get();
                    let mut guard = output.acquire();
                    guard.push(d);
                    guard.release();
                }
            })
        })
        .collect::<Vec<_>>();
    let producers = (0..n_producers)
        .map(|p| {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer").spawn(move || {
                for i in 0..per_producer {
                    buffer.put(p * per_producer + i);
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in consumers.into_iter().chain(producers) {
        assert_eq!(handle.join(), 0);
    }
    let mut output = output.acquire();
    output.sort();
    assert_eq!(*output, (0..total).collect::<Vec<_>>());
    output.release();
}

#[grade]
pub fn bounded_buffer_1() {
    bounded_buffer(1, 6, 6);
}

#[grade(timer_interval = 20)]
pub fn bounded_buffer_2() {
    bounded_buffer(4, 3, 24);
}

/// Two threads take turns through a shared counter while the timer preempts
/// them as often as possible. A single lost wakeup leaves both of them asleep.
#[grade(timer_interval = 20)]
pub fn no_lost_wakeup() {
    const ROUNDS: usize = 200;
    let turn = Arc::new(Lock::new(0usize));
    let changed = Arc::new(Condition::new(&turn));

    let players = (0..2)
        .map(|me| {
            let (turn, changed) = (turn.clone(), changed.clone());
            ThreadBuilder::new(format!("player{me}")).spawn(move || {
                for _ in 0..ROUNDS {
                    let mut count = changed.sleep_while(turn.acquire(), |count| *count % 2 != me);
                    *count += 1;
                    changed.wake(&count);
                    count.release();
                }
            })
        })
        .collect::<Vec<_>>();
    for player in players {
        assert_eq!(player.join(), 0);
    }

    let count = turn.acquire();
    assert_eq!(*count, 2 * ROUNDS);
    count.release();
}

fn spawn_sleepers(
    lock: &Arc<Lock<Vec<usize>>>,
    cond: &Arc<Condition>,
    n: usize,
) -> Vec<uniproc::thread::JoinHandle> {
    (0..n)
        .map(|i| {
            let (lock, cond) = (lock.clone(), cond.clone());
            let handle = ThreadBuilder::new(format!("sleeper{i}")).spawn(move || {
                let mut order = cond.sleep(lock.acquire());
                order.push(i);
                order.release();
            });
            wait_for_state(handle.tid, ThreadState::Parked);
            handle
        })
        .collect()
}

#[grade]
pub fn wake_one_fifo() {
    const SLEEPERS: usize = 5;
    let lock = Arc::new(Lock::new(Vec::new()));
    let cond = Arc::new(Condition::new(&lock));
    let sleepers = spawn_sleepers(&lock, &cond, SLEEPERS);
    assert_eq!(cond.waiters(), SLEEPERS);

    for woken in 0..SLEEPERS {
        let guard = lock.acquire();
        assert!(cond.wake(&guard));
        guard.release();
        assert_eq!(cond.waiters(), SLEEPERS - woken - 1);
    }
    let guard = lock.acquire();
    assert!(!cond.wake(&guard), "wake on an empty queue must do nothing");
    guard.release();

    for sleeper in sleepers {
        assert_eq!(sleeper.join(), 0);
    }
    let order = lock.acquire();
    assert_eq!(*order, (0..SLEEPERS).collect::<Vec<_>>());
    order.release();
}

#[grade]
pub fn wake_all() {
    const SLEEPERS: usize = 5;
    let lock = Arc::new(Lock::new(Vec::new()));
    let cond = Arc::new(Condition::new(&lock));
    let sleepers = spawn_sleepers(&lock, &cond, SLEEPERS);

    let guard = lock.acquire();
    assert_eq!(cond.wake_all(&guard), SLEEPERS);
    assert_eq!(cond.wake_all(&guard), 0);
    // Woken threads only run once the lock is released.
    assert!(guard.is_empty());
    guard.release();

    for sleeper in sleepers {
        assert_eq!(sleeper.join(), 0);
    }
    let order = lock.acquire();
    assert_eq!(*order, (0..SLEEPERS).collect::<Vec<_>>());
    order.release();
}

#[grade]
pub fn sleep_while_checks_first() {
    let lock = Lock::new(3);
    let cond = Condition::new(&lock);
    // Nobody could wake us up, so sleeping here would deadlock.
    let guard = cond.sleep_while(lock.acquire(), |v| *v == 0);
    assert_eq!(*guard, 3);
    guard.release();
}

#[grade]
#[assert_exit_code(-1)]
pub fn wake_with_foreign_lock() {
    let lock = Lock::new(());
    let other = Lock::new(());
    let cond = Condition::new(&lock);
    let guard = other.acquire();
    cond.wake(&guard);
}

#[grade]
#[assert_exit_code(-1)]
pub fn sleep_with_foreign_lock() {
    let lock = Lock::new(());
    let other = Lock::new(());
    let cond = Condition::new(&lock);
    let _guard = cond.sleep(other.acquire());
}
