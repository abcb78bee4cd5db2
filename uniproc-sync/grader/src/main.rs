mod alarm;
mod communicator;
mod condition;
mod lock;
mod semaphore;

fn main() {
    let ok = uniproc::TestDriver::start([
        // Lock.
        &lock::smoke,
        &lock::parking,
        &lock::mutual_exclusion,
        &lock::fifo_handoff,
        &lock::try_acquire,
        &lock::into_inner,
        &lock::recursive_acquire,
        // Condition.
        &condition::bounded_buffer_1,
        &condition::bounded_buffer_2,
        &condition::no_lost_wakeup,
        &condition::wake_one_fifo,
        &condition::wake_all,
        &condition::sleep_while_checks_first,
        &condition::wake_with_foreign_lock,
        &condition::sleep_with_foreign_lock,
        // Semaphore.
        &semaphore::sema_0,
        &semaphore::sema_1,
        &semaphore::sema_2,
        &semaphore::exec_order,
        &semaphore::n_permits,
        &semaphore::permits_guard_resource,
        // Alarm.
        &alarm::zero_ticks,
        &alarm::single,
        &alarm::ordering,
        &alarm::same_deadline_in_arrival_order,
        &alarm::one_tick_wakes_in_deadline_order,
        &alarm::never_early_while_busy,
        &alarm::many_sleepers,
        // Communicator.
        &communicator::listener_first,
        &communicator::speaker_first,
        &communicator::speaker_waits_for_listener,
        &communicator::speakers_in_order,
        &communicator::many_speakers_first,
        &communicator::many_listeners_first,
        &communicator::many_interleaved,
    ]);
    if !ok {
        std::process::exit(1);
    }
}
