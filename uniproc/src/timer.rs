//! Virtual clock and timer interrupt.
//!
//! Time is measured in ticks. The clock only moves forward: by
//! `system_tick` ticks whenever a thread re-enables interrupts, and directly
//! to the next timer interrupt when the cpu would otherwise be idle.
//!
//! The timer fires on every multiple of `timer_interval`. On each fire, the
//! registered [`TimerHandler`]s run in interrupt context, in registration
//! order, followed by the scheduler's [`timer_tick`].
//!
//! [`timer_tick`]: crate::thread::scheduler::Scheduler::timer_tick
use crate::machine;
use std::sync::Arc;

/// A callback of the periodic timer interrupt.
///
/// Handlers run with interrupts disabled on whatever thread was interrupted.
/// They must not park.
pub trait TimerHandler: Send + Sync {
    /// Called on every timer interrupt with the current time.
    fn timer_interrupt(&self, now: u64);

    /// The earliest time at which this handler wants to run.
    ///
    /// When no thread is runnable, the machine skips ahead to the first timer
    /// interrupt at or after the earliest deadline among all handlers. A
    /// handler without pending work returns `None`.
    fn next_deadline(&self) -> Option<u64> {
        None
    }
}

/// Register a handler to the timer interrupt of the running machine.
pub fn register(handler: Arc<dyn TimerHandler>) {
    machine::current().register_timer_handler(handler);
}

/// Get the current time in ticks.
pub fn ticks() -> u64 {
    machine::current().ticks()
}

/// Get the interval of the periodic timer interrupt in ticks.
pub fn interval() -> u64 {
    machine::current().config.timer_interval
}
