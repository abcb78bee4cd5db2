//! Thread scheduler

use super::{Thread, ThreadState};
use crate::{KernelError, machine::{self, Machine}};
use crossbeam_queue::SegQueue;

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It provides an interface for managing threads,
/// determining which thread to run next, and handling periodic timer
/// interrupts.
///
/// The machine calls into the scheduler with interrupts disabled, so an
/// implementation never races with the threads it schedules.
pub trait Scheduler: Send + Sync {
    /// Peek a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`.
    fn next_to_run(&self) -> Option<Box<Thread>>;

    /// Push a thread `th` into scheduling queue.
    fn push_to_queue(&self, th: Box<Thread>);

    /// Called on every timer interrupt.
    ///
    /// A scheduler that wants to preempt the running thread calls
    /// [`yield_on_return`] here.
    fn timer_tick(&self);
}

/// Request the running thread to give up the cpu once the timer interrupt
/// returns.
pub fn yield_on_return() {
    machine::current().request_yield();
}

/// A First-in-first-out scheduler.
///
/// When `preemptive`, the running thread is moved to the back of the queue on
/// every timer interrupt.
pub struct Fifo {
    runqueue: SegQueue<Box<Thread>>,
    preemptive: bool,
}

impl Fifo {
    /// Create a new FIFO scheduler.
    pub fn new(preemptive: bool) -> Self {
        Self {
            runqueue: SegQueue::new(),
            preemptive,
        }
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        self.runqueue.pop()
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        self.runqueue.push(th);
    }

    fn timer_tick(&self) {
        if self.preemptive {
            yield_on_return();
        }
    }
}

/// How the current thread leaves the cpu.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Leave {
    /// The thread comes back once it is scheduled again.
    Park,
    /// The thread never comes back.
    Exit,
}

/// Pick the next thread and hand the cpu to it.
///
/// Must be called with interrupts disabled, after the current thread gave up
/// its slot on the cpu.
pub(crate) fn run_next(machine: &Machine, leave: Leave) {
    loop {
        match machine.scheduler.next_to_run() {
            // Leftover handle of a thread that died while parked.
            Some(th) if th.context.state() == ThreadState::Exited => continue,
            Some(th) => return switch_to(machine, th, leave),
            None if machine.idle() => continue,
            None => {
                crate::warning!(
                    "Deadlock: no runnable thread and no pending timer at tick {}.",
                    machine.ticks()
                );
                machine.halt(Err(KernelError::Deadlock));
                if leave == Leave::Park {
                    machine::wait_for_cpu();
                }
                return;
            }
        }
    }
}

fn switch_to(machine: &Machine, next: Box<Thread>, leave: Leave) {
    let context = next.context.clone();
    let is_current = next.tid == machine::current_tid();
    context.set_state(ThreadState::Running);
    machine.set_running(next);
    if is_current {
        return;
    }
    context.scheduled.store(true, core::sync::atomic::Ordering::SeqCst);
    context.unparker.unpark();
    if leave == Leave::Park {
        machine::wait_for_cpu();
    }
}

/// Move the running thread to the back of the run queue and schedule.
pub(crate) fn requeue_current(machine: &Machine) {
    let Some(th) = machine.take_running() else {
        panic!("No thread is running on the cpu.");
    };
    th.context.set_state(ThreadState::Runnable);
    machine.scheduler.push_to_queue(th);
    run_next(machine, Leave::Park);
}
