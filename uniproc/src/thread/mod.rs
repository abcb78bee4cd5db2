//! Thread abstraction.
//!
//! ## The threading model
//!
//! A machine runs a collection of threads, each with its own stack and local
//! state. Only one of them holds the cpu at a time. A thread gives the cpu up
//! by parking itself with [`Current::park_with`], by yielding, by exiting, or
//! by being preempted when it re-enables interrupts after the timer fired.
//!
//! A parked thread is represented by its [`ParkHandle`]. Whoever owns the
//! handle decides when the thread becomes runnable again.
pub mod scheduler;

use crate::{
    KernelError,
    interrupt::{InterruptGuard, without_preemption},
    machine::{self, Machine},
    sync::{SpinLock, spinlock},
};
use crossbeam_utils::sync::{Parker, Unparker};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use scheduler::Leave;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is parked.
    Parked,
    /// Thread is exited.
    Exited,
}

/// Unwind payload of [`Current::exit`].
struct ExitRequest(i32);

/// State of a thread shared between its handles and the machine.
pub(crate) struct Context {
    state: AtomicU8,
    /// Mixture of exit state (63th bit) and exit code (lower 32 bits).
    exit_status: AtomicU64,
    joiners: SpinLock<Vec<ParkHandle>>,
    pub(crate) scheduled: AtomicBool,
    pub(crate) halted: AtomicBool,
    pub(crate) unparker: Unparker,
}

impl Context {
    pub(crate) fn state(&self) -> ThreadState {
        ThreadState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(ThreadState::Exited)
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    fn exit_code(&self) -> Option<i32> {
        let v = self.exit_status.load(Ordering::SeqCst);
        (v >= 0x8000_0000_0000_0000).then_some(v as i32)
    }
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
///
/// Exited threads are forgotten by the machine; querying them returns
/// [`KernelError::InvalidArgument`].
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, KernelError> {
    machine::current()
        .thread_state(tid)
        .ok_or(KernelError::InvalidArgument)
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: u64,
    /// Thread name
    pub name: String,
    pub(crate) context: Arc<Context>,
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    context: Arc<Context>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    ///
    /// A thread that panicked exits with `-1`.
    pub fn join(self) -> i32 {
        loop {
            let _p = InterruptGuard::new();
            if let Some(code) = self.context.exit_code() {
                return code;
            }
            Current::park_with(|handle| {
                let mut joiners = self.context.joiners.lock();
                joiners.push(handle);
                joiners.unlock();
            });
        }
    }

    /// Returns true if the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.context.exit_code().is_some()
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    pub(crate) th: Box<Thread>,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        // The thread died while parked.
        if self.th.context.exit_code().is_some() {
            return;
        }
        self.th.context.set_state(ThreadState::Runnable);
        machine::current().scheduler.push_to_queue(self.th);
    }
}

/// The opaque structure indicating the running thread on the cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs with interrupts disabled, so nothing can unpark the thread
    /// between the handle being published and the thread giving up the cpu.
    /// Spinlocks taken before the call must be released inside `f`.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let _p = InterruptGuard::new();
        let machine = machine::current();
        assert!(
            !machine.in_interrupt(),
            "Try to park a thread inside an interrupt handler."
        );
        let Some(th) = machine.take_running() else {
            panic!("No thread is running on the cpu.");
        };
        th.context.set_state(ThreadState::Parked);
        f(ParkHandle { th });
        assert!(
            spinlock::held() == 0,
            "Try to park a thread while holding a lock."
        );
        scheduler::run_next(&machine, Leave::Park);
    }

    /// Give up the cpu to the next runnable thread.
    pub fn yield_now() {
        let _p = InterruptGuard::new();
        let machine = machine::current();
        assert!(
            !machine.in_interrupt(),
            "Try to yield inside an interrupt handler."
        );
        scheduler::requeue_current(&machine);
    }

    /// Exit the current thread with `exit_code`.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            spinlock::held() == 0,
            "Try to exit a thread while holding a lock."
        );
        std::panic::resume_unwind(Box::new(ExitRequest(exit_code)))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        machine::current_tid()
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
        }
    }

    /// Spawn the thread as a parked state.
    pub fn spawn_as_parked<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> ParkHandle {
        let (th, _) = self.into_thread(&machine::current(), thread_fn);
        th.context.set_state(ThreadState::Parked);
        ParkHandle { th }
    }

    /// Spawn the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let machine = machine::current();
        let (th, handle) = self.into_thread(&machine, thread_fn);
        machine.scheduler.push_to_queue(th);
        handle
    }

    pub(crate) fn into_thread<F: FnOnce() + Send + 'static>(
        self,
        machine: &Arc<Machine>,
        thread_fn: F,
    ) -> (Box<Thread>, JoinHandle) {
        let tid = machine.alloc_tid();
        let parker = Parker::new();
        let context = Arc::new(Context {
            state: AtomicU8::new(ThreadState::Runnable.into()),
            exit_status: AtomicU64::new(0),
            joiners: SpinLock::new(Vec::new()),
            scheduled: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            unparker: parker.unparker().clone(),
        });

        let host = {
            let machine = machine.clone();
            let context = context.clone();
            std::thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || thread_start(machine, tid, context, parker, thread_fn))
                .unwrap_or_else(|e| panic!("Failed to spawn host thread: {e}"))
        };
        machine.register_thread(tid, context.clone(), host);

        let handle = JoinHandle {
            tid,
            context: context.clone(),
        };
        let th = Box::new(Thread {
            tid,
            name: self.name,
            context,
        });
        (th, handle)
    }
}

/// The very beginning of the thread.
fn thread_start<F: FnOnce() + Send>(
    machine: Arc<Machine>,
    tid: u64,
    context: Arc<Context>,
    parker: Parker,
    thread_fn: F,
) {
    machine::install(machine.clone(), tid, context.clone(), parker);
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        machine::wait_for_cpu();
        thread_fn()
    }));
    let exit_code = match result {
        Ok(()) => 0,
        Err(payload) => match payload.downcast::<ExitRequest>() {
            Ok(request) => request.0,
            Err(payload) if payload.is::<machine::Halted>() => {
                machine.reap_next();
                return;
            }
            Err(_) => -1,
        },
    };
    do_exit(&machine, tid, &context, exit_code);
}

fn do_exit(machine: &Machine, tid: u64, context: &Context, exit_code: i32) {
    without_preemption(|| {
        // A thread that panicked while parked no longer owns the cpu slot.
        if let Some(th) = machine.take_running() {
            assert_eq!(th.tid, tid, "Exiting thread does not own the cpu.");
        }
        context.set_state(ThreadState::Exited);
        context
            .exit_status
            .store(0x8000_0000_0000_0000 | exit_code as u64, Ordering::SeqCst);
        machine.unregister_thread(tid);

        let joiners = {
            let mut guard = context.joiners.lock();
            let joiners = core::mem::take(&mut *guard);
            guard.unlock();
            joiners
        };
        for joiner in joiners {
            joiner.unpark();
        }

        if tid == machine.main_tid() {
            machine.halt(Ok(exit_code));
        } else {
            scheduler::run_next(machine, Leave::Exit);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemConfigurationBuilder;
    use std::sync::Mutex;

    fn boot(main: impl FnOnce() + Send + 'static) -> Result<i32, KernelError> {
        SystemConfigurationBuilder::new().quiet(true).boot(main)
    }

    #[test]
    fn main_exit_code_is_returned() {
        assert_eq!(boot(|| Current::exit(3)), Ok(3));
        assert_eq!(boot(|| {}), Ok(0));
    }

    #[test]
    fn join_returns_exit_code() {
        let r = boot(|| {
            let a = ThreadBuilder::new("a").spawn(|| Current::exit(11));
            let b = ThreadBuilder::new("b").spawn(|| panic!("expected"));
            assert_eq!(a.join(), 11);
            assert_eq!(b.join(), -1);
        });
        assert_eq!(r, Ok(0));
    }

    #[test]
    fn is_finished_after_exit() {
        let r = boot(|| {
            let child = ThreadBuilder::new("child").spawn(|| Current::exit(5));
            assert!(!child.is_finished());
            Current::yield_now();
            assert!(child.is_finished());
            assert_eq!(child.join(), 5);
        });
        assert_eq!(r, Ok(0));
    }

    #[test]
    fn panicking_main_exits_with_minus_one() {
        assert_eq!(boot(|| panic!("expected")), Ok(-1));
    }

    #[test]
    fn fifo_run_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let r = boot({
            let order = order.clone();
            move || {
                let handles = (0..4)
                    .map(|i| {
                        let order = order.clone();
                        ThreadBuilder::new("worker").spawn(move || order.lock().unwrap().push(i))
                    })
                    .collect::<Vec<_>>();
                for handle in handles {
                    handle.join();
                }
            }
        });
        assert_eq!(r, Ok(0));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn park_and_unpark() {
        let r = boot(|| {
            let slot = Arc::new(SpinLock::new(None::<ParkHandle>));
            let parked = {
                let slot = slot.clone();
                ThreadBuilder::new("parked").spawn(move || {
                    Current::park_with(|handle| {
                        let mut guard = slot.lock();
                        *guard = Some(handle);
                        guard.unlock();
                    });
                })
            };
            while get_state_by_tid(parked.tid) != Ok(ThreadState::Parked) {
                Current::yield_now();
            }
            let handle = {
                let mut guard = slot.lock();
                let handle = guard.take();
                guard.unlock();
                handle
            };
            handle.unwrap().unpark();
            let tid = parked.tid;
            assert_eq!(parked.join(), 0);
            assert_eq!(get_state_by_tid(tid), Err(KernelError::InvalidArgument));
        });
        assert_eq!(r, Ok(0));
    }

    #[test]
    fn spawn_as_parked_runs_once_unparked() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = boot({
            let ran = ran.clone();
            move || {
                let handle = {
                    let ran = ran.clone();
                    ThreadBuilder::new("late").spawn_as_parked(move || {
                        ran.store(true, Ordering::SeqCst);
                    })
                };
                let tid = handle.tid();
                assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Parked));
                Current::yield_now();
                assert!(!ran.load(Ordering::SeqCst));
                handle.unpark();
                while get_state_by_tid(tid).is_ok() {
                    Current::yield_now();
                }
            }
        });
        assert_eq!(r, Ok(0));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn parking_forever_is_a_deadlock() {
        let r = boot(|| {
            let forgotten = ThreadBuilder::new("forgotten")
                .spawn(|| Current::park_with(|handle| core::mem::forget(handle)));
            forgotten.join();
        });
        assert_eq!(r, Err(KernelError::Deadlock));
    }

    #[test]
    fn remaining_threads_are_torn_down_on_halt() {
        let r = boot(|| {
            for _ in 0..3 {
                ThreadBuilder::new("spinner").spawn(|| {
                    loop {
                        Current::yield_now();
                    }
                });
            }
            Current::yield_now();
            Current::exit(5);
        });
        assert_eq!(r, Ok(5));
    }
}
