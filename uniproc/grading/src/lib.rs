//! Helpers for writing uniproc test cases.
pub use grading_derive::*;

use uniproc::{
    SystemConfigurationBuilder,
    thread::{Current, ThreadState, get_state_by_tid},
};

/// Boot a machine configured by `config` with `case` as the main thread, and
/// check that it exits cleanly.
#[track_caller]
pub fn run_case(config: SystemConfigurationBuilder, case: fn()) {
    assert_eq!(config.boot(case), Ok(0), "test case did not exit cleanly");
}

/// Yield the cpu until the thread `tid` reaches `state`.
///
/// # Panics
///
/// Panics if the thread does not get there within a bounded number of
/// yields.
pub fn wait_for_state(tid: u64, state: ThreadState) {
    for _ in 0..100_000 {
        if get_state_by_tid(tid) == Ok(state) {
            return;
        }
        Current::yield_now();
    }
    panic!("thread {tid} never became {state:?}");
}

/// Yield the cpu `n` times.
pub fn yield_n(n: usize) {
    for _ in 0..n {
        Current::yield_now();
    }
}
