//! Interrupt management.
//!
//! The simulated processor has a single interrupt enable flag
//! ([`Rflags::IF`]). Each thread carries its own copy of the flags register,
//! which is what a real context switch saves and restores. Disabling
//! interrupts is the only critical section a uniprocessor needs: while the
//! flag is clear the timer cannot fire, so the running thread cannot be
//! preempted.
//!
//! Re-enabling interrupts is also where time passes. When the outermost
//! [`InterruptGuard`] is dropped, the machine advances the clock by
//! `system_tick` ticks and delivers the timer interrupt if it became due.
use core::{cell::Cell, marker::PhantomData};

bitflags::bitflags! {
    /// Flags register of the simulated processor.
    pub struct Rflags: u64 {
        /// Reserved. Always set.
        const _1 = 1 << 1;
        /// Interrupt enable flag.
        const IF = 1 << 9;
    }
}

/// Current interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupt is enabled.
    On,
    /// Interrupt is disabled.
    Off,
}

struct InterruptGuardInner {
    rflags: Cell<Rflags>,
    initial_state: Cell<Option<InterruptState>>,
    cnt: Cell<isize>,
}

impl InterruptGuardInner {
    fn new() -> Self {
        Self {
            // Threads start with interrupts enabled.
            rflags: Cell::new(Rflags::_1 | Rflags::IF),
            initial_state: Cell::new(None),
            cnt: Cell::new(0),
        }
    }

    fn save_nested_interrupt_state(&self, state: InterruptState) {
        if self.cnt.get() == 0 {
            self.initial_state.set(Some(state));
        }
        self.cnt.set(self.cnt.get() + 1);
    }

    /// Returns true if the outermost guard was released and interrupts are
    /// back on.
    fn load_nested_interrupt_state(&self) -> bool {
        let cnt = self.cnt.get() - 1;
        assert!(cnt >= 0, "Unbalanced interrupt guard.");
        self.cnt.set(cnt);
        if cnt == 0 && self.initial_state.take() == Some(InterruptState::On) {
            self.rflags.set(self.rflags.get() | Rflags::IF);
            true
        } else {
            false
        }
    }
}

thread_local! {
    static PER_THREAD_STATE: InterruptGuardInner = InterruptGuardInner::new();
}

impl InterruptState {
    /// Read the current interrupt state.
    pub fn current() -> Self {
        PER_THREAD_STATE.with(|s| {
            if s.rflags.get().contains(Rflags::IF) {
                InterruptState::On
            } else {
                InterruptState::Off
            }
        })
    }

    pub(crate) fn disable() {
        PER_THREAD_STATE.with(|s| s.rflags.set(s.rflags.get() - Rflags::IF));
    }
}

/// An RAII implementation of an "interrupt disabled". When this structure is
/// dropped (falls out of scope), the interrupt will be restored to the state
/// when the guard was created.
///
/// Guards nest. Only the outermost guard re-enables interrupts, and dropping
/// it is a preemption point: a pending timer interrupt is delivered there.
/// Guards must be dropped in the reverse order of their creation.
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Create a new InterruptGuard.
    pub fn new() -> Self {
        let state = InterruptState::current();
        InterruptState::disable();
        PER_THREAD_STATE.with(|s| s.save_nested_interrupt_state(state));
        Self {
            _not_send: PhantomData,
        }
    }

    /// Check whether the interrupt is disabled by a guard.
    pub fn is_guarded() -> bool {
        PER_THREAD_STATE.with(|s| s.cnt.get() != 0)
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if PER_THREAD_STATE.with(|s| s.load_nested_interrupt_state())
            && !std::thread::panicking()
        {
            crate::machine::on_interrupt_enabled();
        }
    }
}

/// Run `f` with interrupts disabled, restoring the previous state afterwards
/// without passing through the preemption point.
///
/// The machine uses this for its own bookkeeping (timer delivery, context
/// switches) where ticking the clock again would re-enter it.
pub(crate) fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    let state = InterruptState::current();
    InterruptState::disable();
    PER_THREAD_STATE.with(|s| s.save_nested_interrupt_state(state));
    let r = f();
    PER_THREAD_STATE.with(|s| s.load_nested_interrupt_state());
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_restore_outermost_state() {
        // Host test threads never boot a machine, so the preemption point is a
        // no-op here.
        std::thread::spawn(|| {
            assert_eq!(InterruptState::current(), InterruptState::On);
            let outer = InterruptGuard::new();
            let inner = InterruptGuard::new();
            assert!(InterruptGuard::is_guarded());
            drop(inner);
            assert_eq!(InterruptState::current(), InterruptState::Off);
            drop(outer);
            assert_eq!(InterruptState::current(), InterruptState::On);
            assert!(!InterruptGuard::is_guarded());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn without_preemption_keeps_flags_balanced() {
        std::thread::spawn(|| {
            let v = without_preemption(|| {
                assert_eq!(InterruptState::current(), InterruptState::Off);
                7
            });
            assert_eq!(v, 7);
            assert_eq!(InterruptState::current(), InterruptState::On);
        })
        .join()
        .unwrap();
    }
}
