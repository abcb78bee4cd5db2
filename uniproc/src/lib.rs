//! # uniproc: a simulated uniprocessor for kernel threads
//!
//! **uniproc** runs kernel-style threads on a single simulated cpu. Exactly
//! one thread executes at any instant, and the only way to make a sequence of
//! operations atomic is to disable interrupts with an
//! [`InterruptGuard`](interrupt::InterruptGuard). Blocking synchronization
//! primitives are expected to be built on top of the two low-level tools the
//! runtime offers:
//!
//! - [`SpinLock`](sync::SpinLock), a lock held with interrupts disabled, and
//! - [`Current::park_with`](thread::Current::park_with) together with
//!   [`ParkHandle::unpark`](thread::ParkHandle::unpark), which take the
//!   running thread off the cpu and put it back on the run queue.
//!
//! ## Time
//!
//! The machine keeps a virtual clock in ticks. The clock advances by
//! `system_tick` every time a thread re-enables interrupts, and the timer
//! interrupt fires on every multiple of `timer_interval`. Handlers registered
//! with [`timer::register`] run on each timer interrupt. When every thread is
//! parked, the clock jumps straight to the next timer interrupt with work to
//! do. If there is none, the machine reports a deadlock.
//!
//! ## Booting
//!
//! ```no_run
//! use uniproc::{SystemConfigurationBuilder, thread::ThreadBuilder};
//!
//! let result = SystemConfigurationBuilder::new()
//!     .timer_interval(100)
//!     .boot(|| {
//!         let child = ThreadBuilder::new("child").spawn(|| uniproc::println!("hello"));
//!         assert_eq!(child.join(), 0);
//!     });
//! assert_eq!(result, Ok(0));
//! ```
//!
//! ### Selectively run tests
//!
//! Test runners built with [`TestDriver`] run exactly the test cases listed on
//! the command line, or all of them when none is given:
//!
//! ```bash
//! $ cargo run -- lock::smoke alarm::ordering
//! ```
//!
//! Set `UNIPROC_VERBOSE=1` to see the kernel log of each test case.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod interrupt;
pub mod kprint;
mod machine;
pub mod sync;
pub mod thread;
pub mod timer;

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, Ordering},
};
use thread::scheduler::{Fifo, Scheduler};

/// Suppress the kernel log.
#[doc(hidden)]
pub static QUIET: AtomicBool = AtomicBool::new(false);

/// Enum representing errors that can occur during a kernel operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// No thread can make progress any more.
    Deadlock,
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] configures a machine before it boots:
/// the scheduling policy, the timer and the verbosity of the kernel log.
pub struct SystemConfigurationBuilder {
    scheduler: Option<Box<dyn Scheduler>>,
    timer_interval: u64,
    system_tick: u64,
    preemptive: bool,
    quiet: bool,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Create a builder with the default configuration.
    ///
    /// The timer fires every 500 ticks, re-enabling interrupts costs 10 ticks,
    /// and threads are scheduled by a preemptive [`Fifo`] scheduler.
    pub fn new() -> Self {
        Self {
            scheduler: None,
            timer_interval: 500,
            system_tick: 10,
            preemptive: true,
            quiet: false,
        }
    }

    /// Sets the system-wide scheduler.
    ///
    /// This replaces the default [`Fifo`] scheduler, and [`preemptive`] no
    /// longer applies.
    ///
    /// [`preemptive`]: Self::preemptive
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Sets the interval between two timer interrupts in ticks.
    pub fn timer_interval(mut self, ticks: u64) -> Self {
        self.timer_interval = ticks;
        self
    }

    /// Sets the ticks charged each time interrupts are re-enabled.
    pub fn system_tick(mut self, ticks: u64) -> Self {
        self.system_tick = ticks;
        self
    }

    /// Whether the default scheduler preempts the running thread on the timer
    /// interrupt.
    pub fn preemptive(mut self, preemptive: bool) -> Self {
        self.preemptive = preemptive;
        self
    }

    /// Suppress the kernel log.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Boot the machine with `main` as its first thread.
    ///
    /// Returns once the machine halts: with the exit code of the main thread,
    /// or with [`KernelError::Deadlock`] if every remaining thread is parked
    /// and nothing is pending on the timer.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] if the timer interval or the
    /// system tick is zero.
    pub fn boot<F>(self, main: F) -> Result<i32, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Self {
            scheduler,
            timer_interval,
            system_tick,
            preemptive,
            quiet,
        } = self;
        if timer_interval == 0 || system_tick == 0 {
            return Err(KernelError::InvalidArgument);
        }
        QUIET.store(quiet, Ordering::SeqCst);
        let scheduler = scheduler.unwrap_or_else(|| Box::new(Fifo::new(preemptive)));
        machine::boot(
            machine::Config {
                timer_interval,
                system_tick,
            },
            scheduler,
            Box::new(main),
        )
    }
}

// Test utilities
#[doc(hidden)]
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self, config: SystemConfigurationBuilder) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }

    fn run(&'static self, config: SystemConfigurationBuilder) -> bool {
        crate::print!("test {} ... ", self.name());
        match config.boot(move || self()) {
            Ok(0) => {
                crate::println!("ok");
                true
            }
            Ok(code) => {
                crate::println!("FAILED (exit code {code})");
                false
            }
            Err(e) => {
                crate::println!("FAILED ({e:?})");
                false
            }
        }
    }
}

/// A driver for running tests.
pub struct TestDriver {
    _p: (),
}

impl TestDriver {
    /// Run the given tests, each on a freshly booted machine.
    ///
    /// Returns true if every selected test passed.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC]) -> bool {
        let filter = std::env::args().skip(1).collect::<BTreeSet<_>>();
        let verbose = std::env::var_os("UNIPROC_VERBOSE").is_some();
        let tests = tests
            .iter()
            .filter(|test| {
                let name = test.name();
                let r = name.split("::").next().map(|n| n.len() + 2).unwrap_or(0);
                filter.is_empty() || filter.contains(&name[r..])
            })
            .collect::<Vec<_>>();
        let (total, mut succ) = (tests.len(), 0);
        crate::println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run(SystemConfigurationBuilder::new().quiet(!verbose)) {
                succ += 1;
            }
        }
        crate::println!(
            "test result: {}. {} passed; {} failed",
            if total == succ { "ok" } else { "FAILED" },
            succ,
            total - succ
        );
        total == succ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sync::SpinLock,
        thread::{Current, ParkHandle, Thread, ThreadBuilder},
        timer::TimerHandler,
    };
    use std::sync::{Arc, Mutex};

    #[test]
    fn zero_interval_is_rejected() {
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(0)
            .boot(|| {});
        assert_eq!(r, Err(KernelError::InvalidArgument));
    }

    struct Counter {
        fired: SpinLock<Vec<u64>>,
    }

    impl TimerHandler for Counter {
        fn timer_interrupt(&self, now: u64) {
            let mut fired = self.fired.lock();
            fired.push(now);
            fired.unlock();
        }
    }

    #[test]
    fn timer_fires_on_interval_multiples() {
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(100)
            .boot(|| {
                let counter = Arc::new(Counter {
                    fired: SpinLock::new(Vec::new()),
                });
                timer::register(counter.clone());
                let start = timer::ticks();
                while timer::ticks() < start + 1000 {
                    Current::yield_now();
                }
                let fired = counter.fired.lock();
                assert!(fired.len() >= 9);
                assert!(fired.windows(2).all(|w| w[0] < w[1]));
                assert!(fired.iter().all(|t| t % 100 == 0));
                fired.unlock();
            });
        assert_eq!(r, Ok(0));
    }

    struct Wakeup {
        at: u64,
        handle: SpinLock<Option<ParkHandle>>,
    }

    impl TimerHandler for Wakeup {
        fn timer_interrupt(&self, now: u64) {
            if now < self.at {
                return;
            }
            let mut handle = self.handle.lock();
            let handle_ = handle.take();
            handle.unlock();
            if let Some(handle) = handle_ {
                handle.unpark();
            }
        }

        fn next_deadline(&self) -> Option<u64> {
            let handle = self.handle.lock();
            let pending = handle.is_some();
            handle.unlock();
            pending.then_some(self.at)
        }
    }

    #[test]
    fn idle_skips_to_next_deadline() {
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(100)
            .boot(|| {
                let wakeup = Arc::new(Wakeup {
                    at: 12_345,
                    handle: SpinLock::new(None),
                });
                timer::register(wakeup.clone());
                Current::park_with(|handle| {
                    let mut slot = wakeup.handle.lock();
                    *slot = Some(handle);
                    slot.unlock();
                });
                let now = timer::ticks();
                assert!(now >= 12_400 && now < 12_500, "woke up at {now}");
            });
        assert_eq!(r, Ok(0));
    }

    #[test]
    fn non_preemptive_fifo_runs_to_completion() {
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(20)
            .preemptive(false)
            .boot(|| {
                let flag = Arc::new(AtomicBool::new(false));
                let child = {
                    let flag = flag.clone();
                    ThreadBuilder::new("child").spawn(move || flag.store(true, Ordering::SeqCst))
                };
                // Ticks pass, but the child cannot run until main gives up the cpu.
                for _ in 0..100 {
                    drop(interrupt::InterruptGuard::new());
                }
                assert!(!flag.load(Ordering::SeqCst));
                child.join();
                assert!(flag.load(Ordering::SeqCst));
            });
        assert_eq!(r, Ok(0));
    }

    /// Runs the most recently queued thread first.
    #[derive(Default)]
    struct Lifo {
        stack: Mutex<Vec<Box<Thread>>>,
    }

    impl Scheduler for Lifo {
        fn next_to_run(&self) -> Option<Box<Thread>> {
            self.stack.lock().unwrap().pop()
        }

        fn push_to_queue(&self, th: Box<Thread>) {
            self.stack.lock().unwrap().push(th);
        }

        fn timer_tick(&self) {}
    }

    #[test]
    fn custom_scheduler_decides_run_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .set_scheduler(Lifo::default())
            .boot({
                let order = order.clone();
                move || {
                    let handles = (0..3)
                        .map(|i| {
                            let order = order.clone();
                            ThreadBuilder::new("worker")
                                .spawn(move || order.lock().unwrap().push(i))
                        })
                        .collect::<Vec<_>>();
                    for handle in handles {
                        assert_eq!(handle.join(), 0);
                    }
                }
            });
        assert_eq!(r, Ok(0));
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn preemptive_fifo_switches_on_timer() {
        let r = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(20)
            .boot(|| {
                let flag = Arc::new(AtomicBool::new(false));
                let _child = {
                    let flag = flag.clone();
                    ThreadBuilder::new("child").spawn(move || flag.store(true, Ordering::SeqCst))
                };
                while !flag.load(Ordering::SeqCst) {
                    drop(interrupt::InterruptGuard::new());
                }
            });
        assert_eq!(r, Ok(0));
    }
}
