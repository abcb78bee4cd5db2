use grading::{grade, wait_for_state};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use uniproc::{
    thread::{Current, JoinHandle, ThreadBuilder, ThreadState},
    timer,
};
use uniproc_sync::{Alarm, Lock};

/// Sleep for `ticks` and check that the wakeup came neither early nor
/// later than `slack` ticks after the deadline.
fn sleep_and_check(alarm: &Alarm, ticks: u64, slack: u64) -> u64 {
    let start = timer::ticks();
    alarm.wait_until(ticks);
    let woke = timer::ticks();
    assert!(
        woke >= start + ticks,
        "woke up at {woke}, before the deadline {}",
        start + ticks
    );
    assert!(
        woke < start + ticks + slack,
        "woke up at {woke}, long after the deadline {}",
        start + ticks
    );
    woke
}

#[grade]
pub fn zero_ticks() {
    let alarm = Alarm::new();
    let start = timer::ticks();
    alarm.wait_until(0);
    assert_eq!(alarm.pending(), 0);
    assert!(timer::ticks() - start < timer::interval());
}

#[grade]
pub fn single() {
    let alarm = Alarm::new();
    // The first timer interrupt at or after the deadline wakes us up.
    sleep_and_check(&alarm, 1000, timer::interval() + 50);
    sleep_and_check(&alarm, 1, timer::interval() + 50);
    sleep_and_check(&alarm, 1234, timer::interval() + 50);
    assert_eq!(alarm.pending(), 0);
}

#[grade]
pub fn ordering() {
    const DURATIONS: [u64; 5] = [5000, 1000, 3000, 2000, 4000];
    let alarm = Alarm::new();
    let order = Arc::new(Lock::new(Vec::new()));

    let handles = DURATIONS
        .iter()
        .map(|&ticks| {
            let (alarm, order) = (alarm.clone(), order.clone());
            ThreadBuilder::new(format!("sleep{ticks}")).spawn(move || {
                sleep_and_check(&alarm, ticks, 2 * timer::interval());
                let mut order = order.acquire();
                order.push(ticks);
                order.release();
            })
        })
        .collect::<Vec<JoinHandle>>();
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }

    let order = order.acquire();
    let mut expected = DURATIONS.to_vec();
    expected.sort();
    assert_eq!(*order, expected);
    order.release();
}

#[grade(preemptive = false)]
pub fn same_deadline_in_arrival_order() {
    const SLEEPERS: usize = 5;
    let alarm = Alarm::new();
    let order = Arc::new(Lock::new(Vec::new()));
    let deadline = timer::ticks() + 10 * timer::interval() + 7;

    let handles = (0..SLEEPERS)
        .map(|i| {
            let (alarm, order) = (alarm.clone(), order.clone());
            ThreadBuilder::new(format!("sleeper{i}")).spawn(move || {
                let now = timer::ticks();
                alarm.wait_until(deadline - now);
                let mut order = order.acquire();
                order.push(i);
                order.release();
            })
        })
        .collect::<Vec<JoinHandle>>();
    for handle in handles.iter() {
        wait_for_state(handle.tid, ThreadState::Parked);
    }
    assert_eq!(alarm.pending(), SLEEPERS);

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert!(timer::ticks() >= deadline);
    assert_eq!(alarm.pending(), 0);

    let order = order.acquire();
    assert_eq!(*order, (0..SLEEPERS).collect::<Vec<_>>());
    order.release();
}

/// Distinct deadlines that expire in the same timer interrupt are all woken by
/// it, earliest first.
#[grade(preemptive = false)]
pub fn one_tick_wakes_in_deadline_order() {
    const DURATIONS: [u64; 3] = [30, 10, 20];
    let alarm = Alarm::new();
    let woken = Arc::new(Lock::new(Vec::new()));
    let base = (timer::ticks() / timer::interval() + 10) * timer::interval() + 100;

    let handles = DURATIONS
        .into_iter()
        .map(|d| {
            let (alarm, woken) = (alarm.clone(), woken.clone());
            ThreadBuilder::new(format!("sleeper{d}")).spawn(move || {
                let now = timer::ticks();
                alarm.wait_until(base + d - now);
                let woke = timer::ticks();
                let mut woken = woken.acquire();
                woken.push((d, woke));
                woken.release();
            })
        })
        .collect::<Vec<JoinHandle>>();
    for handle in handles.iter() {
        wait_for_state(handle.tid, ThreadState::Parked);
    }
    assert_eq!(alarm.pending(), DURATIONS.len());

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(alarm.pending(), 0);

    let fire = (base + 30).div_ceil(timer::interval()) * timer::interval();
    let woken = woken.acquire();
    assert_eq!(
        woken.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
        [10, 20, 30]
    );
    for &(d, woke) in woken.iter() {
        assert!(
            (fire..fire + timer::interval()).contains(&woke),
            "sleeper{d} woke at {woke}, expected the interrupt at {fire}"
        );
    }
    woken.release();
}

/// A thread that never sleeps keeps the cpu busy, so the clock only advances
/// tick by tick instead of jumping to the next deadline.
#[grade]
pub fn never_early_while_busy() {
    const DURATIONS: [u64; 5] = [50, 250, 700, 1200, 3000];
    let alarm = Alarm::new();
    let done = Arc::new(AtomicBool::new(false));

    let spinner = {
        let done = done.clone();
        ThreadBuilder::new("spinner").spawn(move || {
            while !done.load(Ordering::SeqCst) {
                Current::yield_now();
            }
        })
    };
    let sleepers = DURATIONS
        .iter()
        .map(|&ticks| {
            let alarm = alarm.clone();
            ThreadBuilder::new(format!("sleep{ticks}")).spawn(move || {
                sleep_and_check(&alarm, ticks, 2 * timer::interval());
            })
        })
        .collect::<Vec<JoinHandle>>();

    for sleeper in sleepers {
        assert_eq!(sleeper.join(), 0);
    }
    done.store(true, Ordering::SeqCst);
    assert_eq!(spinner.join(), 0);
    assert_eq!(alarm.pending(), 0);
}

#[grade]
pub fn many_sleepers() {
    const SLEEPERS: u64 = 20;
    let alarm = Alarm::new();

    let handles = (0..SLEEPERS)
        .map(|i| {
            let alarm = alarm.clone();
            ThreadBuilder::new(format!("sleeper{i}")).spawn(move || {
                let ticks = (i * 37 % 7 + 1) * 100 + i;
                sleep_and_check(&alarm, ticks, 2 * timer::interval());
            })
        })
        .collect::<Vec<JoinHandle>>();
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(alarm.pending(), 0);
}
