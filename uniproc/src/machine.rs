//! The simulated uniprocessor.
//!
//! Every thread runs on its own host thread, but only the holder of the cpu
//! executes. Handing the cpu over means marking the next thread as scheduled
//! and unparking its host thread. The previous holder then blocks until the
//! cpu comes back to it.
//!
//! The machine halts when the main thread exits, or when no thread can ever
//! run again. Threads still alive at that point are torn down one at a time
//! by unwinding their host threads.
use crate::{
    KernelError, interrupt,
    sync::SpinLock,
    thread::{Context, Thread, ThreadState, scheduler::Scheduler},
    timer::TimerHandler,
};
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// Unwind payload to tear down a thread of a halted machine.
pub(crate) struct Halted;

pub(crate) struct Config {
    pub(crate) timer_interval: u64,
    pub(crate) system_tick: u64,
}

pub(crate) struct Machine {
    pub(crate) config: Config,
    pub(crate) scheduler: Box<dyn Scheduler>,
    clock: AtomicU64,
    next_timer: AtomicU64,
    yield_on_return: AtomicBool,
    in_interrupt: AtomicBool,
    halted: AtomicBool,
    powered_off: AtomicBool,
    next_tid: AtomicU64,
    main_tid: AtomicU64,
    running: SpinLock<Option<Box<Thread>>>,
    handlers: SpinLock<Vec<Arc<dyn TimerHandler>>>,
    threads: SpinLock<BTreeMap<u64, Arc<Context>>>,
    host_threads: SpinLock<Vec<std::thread::JoinHandle<()>>>,
    result: SpinLock<Option<Result<i32, KernelError>>>,
    poweroff: Unparker,
}

/// Host-thread local view of the machine.
struct Local {
    machine: Arc<Machine>,
    context: Arc<Context>,
    tid: u64,
    parker: Parker,
}

thread_local! {
    static LOCAL: RefCell<Option<Local>> = const { RefCell::new(None) };
}

pub(crate) fn install(machine: Arc<Machine>, tid: u64, context: Arc<Context>, parker: Parker) {
    LOCAL.with(|local| {
        *local.borrow_mut() = Some(Local {
            machine,
            context,
            tid,
            parker,
        })
    });
}

pub(crate) fn try_current() -> Option<Arc<Machine>> {
    LOCAL
        .try_with(|local| local.borrow().as_ref().map(|l| l.machine.clone()))
        .ok()
        .flatten()
}

/// Get the machine the current thread runs on.
///
/// # Panics
///
/// Panics if called outside of a uniproc thread.
pub(crate) fn current() -> Arc<Machine> {
    try_current().unwrap_or_else(|| panic!("Not running on a uniproc thread."))
}

pub(crate) fn current_tid() -> u64 {
    LOCAL
        .with(|local| local.borrow().as_ref().map(|l| l.tid))
        .unwrap_or_else(|| panic!("Not running on a uniproc thread."))
}

/// Block the host thread until the cpu is handed to the current thread.
///
/// Unwinds with [`Halted`] if the machine tears this thread down instead.
pub(crate) fn wait_for_cpu() {
    let halted = LOCAL.with(|local| {
        let local = local.borrow();
        let Some(local) = local.as_ref() else {
            panic!("Not running on a uniproc thread.");
        };
        loop {
            if local.context.halted.load(Ordering::SeqCst) {
                break true;
            }
            if local.context.scheduled.swap(false, Ordering::SeqCst) {
                break false;
            }
            local.parker.park();
        }
    });
    if halted {
        std::panic::resume_unwind(Box::new(Halted));
    }
}

/// The preemption point, reached whenever the outermost interrupt guard of a
/// thread is released.
pub(crate) fn on_interrupt_enabled() {
    if let Some(machine) = try_current() {
        machine.tick();
    }
}

/// Clears the interrupt context flag even if a handler panics.
struct InterruptContext<'a>(&'a AtomicBool);

impl Drop for InterruptContext<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Machine {
    pub(crate) fn new(config: Config, scheduler: Box<dyn Scheduler>, poweroff: Unparker) -> Self {
        let next_timer = config.timer_interval;
        Self {
            config,
            scheduler,
            clock: AtomicU64::new(0),
            next_timer: AtomicU64::new(next_timer),
            yield_on_return: AtomicBool::new(false),
            in_interrupt: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            powered_off: AtomicBool::new(false),
            next_tid: AtomicU64::new(0),
            main_tid: AtomicU64::new(0),
            running: SpinLock::new(None),
            handlers: SpinLock::new(Vec::new()),
            threads: SpinLock::new(BTreeMap::new()),
            host_threads: SpinLock::new(Vec::new()),
            result: SpinLock::new(None),
            poweroff,
        }
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn in_interrupt(&self) -> bool {
        self.in_interrupt.load(Ordering::SeqCst)
    }

    pub(crate) fn main_tid(&self) -> u64 {
        self.main_tid.load(Ordering::SeqCst)
    }

    pub(crate) fn request_yield(&self) {
        self.yield_on_return.store(true, Ordering::SeqCst);
    }

    pub(crate) fn register_timer_handler(&self, handler: Arc<dyn TimerHandler>) {
        let mut handlers = self.handlers.lock();
        handlers.push(handler);
        handlers.unlock();
    }

    // Thread table.

    pub(crate) fn alloc_tid(&self) -> u64 {
        self.next_tid.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register_thread(
        &self,
        tid: u64,
        context: Arc<Context>,
        host: std::thread::JoinHandle<()>,
    ) {
        let mut threads = self.threads.lock();
        threads.insert(tid, context);
        threads.unlock();
        let mut hosts = self.host_threads.lock();
        hosts.push(host);
        hosts.unlock();
    }

    pub(crate) fn unregister_thread(&self, tid: u64) {
        let mut threads = self.threads.lock();
        threads.remove(&tid);
        threads.unlock();
    }

    pub(crate) fn thread_state(&self, tid: u64) -> Option<ThreadState> {
        let threads = self.threads.lock();
        let state = threads.get(&tid).map(|context| context.state());
        threads.unlock();
        state
    }

    // The cpu.

    pub(crate) fn take_running(&self) -> Option<Box<Thread>> {
        let mut running = self.running.lock();
        let th = running.take();
        running.unlock();
        th
    }

    pub(crate) fn set_running(&self, th: Box<Thread>) {
        let mut running = self.running.lock();
        *running = Some(th);
        running.unlock();
    }

    /// Hand the cpu to `th` from outside of any thread.
    fn dispatch(&self, th: Box<Thread>) {
        let context = th.context.clone();
        context.set_state(ThreadState::Running);
        self.set_running(th);
        context.scheduled.store(true, Ordering::SeqCst);
        context.unparker.unpark();
    }

    // Time.

    fn tick(&self) {
        if self.is_halted() {
            return;
        }
        let tick = self.config.system_tick;
        let now = self.clock.fetch_add(tick, Ordering::SeqCst) + tick;
        if now >= self.next_timer.load(Ordering::SeqCst) {
            interrupt::without_preemption(|| self.timer_interrupt(now));
        }
        if self.yield_on_return.swap(false, Ordering::SeqCst) {
            interrupt::without_preemption(|| crate::thread::scheduler::requeue_current(self));
        }
    }

    fn timer_interrupt(&self, now: u64) {
        let interval = self.config.timer_interval;
        self.next_timer
            .store((now / interval + 1) * interval, Ordering::SeqCst);

        let handlers = {
            let guard = self.handlers.lock();
            let handlers = guard.clone();
            guard.unlock();
            handlers
        };
        self.in_interrupt.store(true, Ordering::SeqCst);
        let _context = InterruptContext(&self.in_interrupt);
        for handler in handlers.iter() {
            handler.timer_interrupt(now);
        }
        self.scheduler.timer_tick();
    }

    /// Skip the idle time up to the next timer interrupt that has work to do
    /// and deliver it.
    ///
    /// Returns `false` if no handler has a pending deadline, in which case
    /// nothing can ever become runnable again.
    pub(crate) fn idle(&self) -> bool {
        let handlers = {
            let guard = self.handlers.lock();
            let handlers = guard.clone();
            guard.unlock();
            handlers
        };
        let Some(deadline) = handlers.iter().filter_map(|h| h.next_deadline()).min() else {
            return false;
        };
        let interval = self.config.timer_interval;
        let next_timer = self.next_timer.load(Ordering::SeqCst);
        let fire = if deadline <= next_timer {
            next_timer
        } else {
            match deadline.div_ceil(interval).checked_mul(interval) {
                Some(fire) => fire,
                None => return false,
            }
        };
        self.clock.fetch_max(fire, Ordering::SeqCst);
        self.timer_interrupt(fire);
        // Nothing to preempt while idle.
        self.yield_on_return.store(false, Ordering::SeqCst);
        true
    }

    // Shutdown.

    /// Halt the machine with `result` and start tearing down the remaining
    /// threads.
    pub(crate) fn halt(&self, result: Result<i32, KernelError>) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        crate::info!("Machine: halted at tick {} with {:?}.", self.ticks(), result);
        let mut slot = self.result.lock();
        *slot = Some(result);
        slot.unlock();
        self.reap_next();
    }

    /// Tear down one remaining thread, or power off if none is left.
    ///
    /// Each torn-down thread calls back here once it has unwound, so threads
    /// are torn down strictly one after another.
    pub(crate) fn reap_next(&self) {
        let next = {
            let mut threads = self.threads.lock();
            let next = threads.pop_first();
            threads.unlock();
            next
        };
        match next {
            Some((_, context)) => {
                context.halted.store(true, Ordering::SeqCst);
                context.unparker.unpark();
            }
            None => {
                self.powered_off.store(true, Ordering::SeqCst);
                self.poweroff.unpark();
            }
        }
    }
}

/// Boot a machine running `main` as its first thread and wait until it halts.
pub(crate) fn boot(
    config: Config,
    scheduler: Box<dyn Scheduler>,
    main: Box<dyn FnOnce() + Send>,
) -> Result<i32, KernelError> {
    let parker = Parker::new();
    let machine = Arc::new(Machine::new(config, scheduler, parker.unparker().clone()));
    crate::info!(
        "Machine: boot with timer interval {} and system tick {}.",
        machine.config.timer_interval,
        machine.config.system_tick
    );

    let (main, _) = crate::thread::ThreadBuilder::new("main").into_thread(&machine, main);
    machine.main_tid.store(main.tid, Ordering::SeqCst);
    machine.dispatch(main);

    while !machine.powered_off.load(Ordering::SeqCst) {
        parker.park();
    }

    let hosts = {
        let mut guard = machine.host_threads.lock();
        let hosts = core::mem::take(&mut *guard);
        guard.unlock();
        hosts
    };
    for host in hosts {
        let _ = host.join();
    }

    let mut slot = machine.result.lock();
    let result = slot.take().unwrap_or(Err(KernelError::Deadlock));
    slot.unlock();
    result
}
