//! # Alarm.
//!
//! The [`Alarm`] lets threads sleep until the virtual clock has advanced by a
//! given number of ticks. Sleepers do not poll the clock. Each one parks on a
//! [`Condition`] of its own, and the timer interrupt wakes every sleeper whose
//! deadline has passed.
//!
//! Pending deadlines are kept in a min-heap ordered by deadline. Sleepers with
//! the same deadline are ordered by the time they went to sleep, so they are
//! woken in arrival order. A timer interrupt only touches the deadlines that
//! have expired.
//!
//! The timer interrupt must never block. The alarm lock is therefore only
//! ever held with interrupts disabled, so the interrupt handler always finds
//! it free and takes it with [`Lock::try_acquire`].
use crate::sync::{Condition, Lock};
use alloc::{collections::BinaryHeap, sync::Arc};
use core::cmp::{Ordering, Reverse};
use uniproc::{
    interrupt::InterruptGuard,
    thread::Current,
    timer::{self, TimerHandler},
};

struct WakeEntry {
    wake_time: u64,
    seq: u64,
    condition: Arc<Condition>,
}

impl WakeEntry {
    fn key(&self) -> (u64, u64) {
        (self.wake_time, self.seq)
    }
}

impl PartialEq for WakeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for WakeEntry {}

impl PartialOrd for WakeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WakeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

struct Pending {
    queue: BinaryHeap<Reverse<WakeEntry>>,
    seq: u64,
}

/// Timed sleep driven by the timer interrupt.
///
/// Create one with [`Alarm::new`] per machine; it registers itself to the
/// timer interrupt of the running machine.
pub struct Alarm {
    pending: Lock<Pending>,
}

impl Alarm {
    /// Creates the alarm and registers it to the timer interrupt.
    pub fn new() -> Arc<Alarm> {
        let alarm = Arc::new(Alarm {
            pending: Lock::new(Pending {
                queue: BinaryHeap::new(),
                seq: 0,
            }),
        });
        timer::register(alarm.clone());
        alarm
    }

    /// Puts the current thread to sleep for at least `ticks` ticks.
    ///
    /// The thread is woken up by the first timer interrupt at or after
    /// `now + ticks`, and returns after it has been scheduled again. Waiting
    /// for zero ticks returns immediately.
    pub fn wait_until(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let _p = InterruptGuard::new();
        let wake_time = timer::ticks().saturating_add(ticks);
        let mut pending = self.pending.acquire();
        let condition = Arc::new(Condition::new(&self.pending));
        let seq = pending.seq;
        pending.seq += 1;
        pending.queue.push(Reverse(WakeEntry {
            wake_time,
            seq,
            condition: condition.clone(),
        }));
        uniproc::debug!(
            "Alarm: thread {} sleeps until tick {}.",
            Current::get_tid(),
            wake_time
        );
        condition.sleep(pending).release();
    }

    /// Number of threads sleeping on this alarm.
    pub fn pending(&self) -> usize {
        let _p = InterruptGuard::new();
        let pending = self.pending.acquire();
        let n = pending.queue.len();
        pending.release();
        n
    }
}

impl TimerHandler for Alarm {
    fn timer_interrupt(&self, now: u64) {
        let Ok(mut pending) = self.pending.try_acquire() else {
            uniproc::warning!("Alarm: lock is busy at tick {now}; sweep skipped.");
            return;
        };
        while pending
            .queue
            .peek()
            .is_some_and(|Reverse(entry)| entry.wake_time <= now)
        {
            let Some(Reverse(entry)) = pending.queue.pop() else {
                break;
            };
            uniproc::debug!(
                "Alarm: deadline {} expired at tick {}.",
                entry.wake_time,
                now
            );
            entry.condition.wake(&pending);
        }
        pending.release();
    }

    fn next_deadline(&self) -> Option<u64> {
        let Ok(pending) = self.pending.try_acquire() else {
            uniproc::warning!("Alarm: lock is busy while idle.");
            return None;
        };
        let deadline = pending.queue.peek().map(|Reverse(entry)| entry.wake_time);
        pending.release();
        deadline
    }
}
