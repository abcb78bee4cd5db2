use grading::{grade, wait_for_state, yield_n};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use uniproc::thread::{Current, JoinHandle, ThreadBuilder, ThreadState};
use uniproc_sync::{Communicator, Lock};

#[grade]
pub fn listener_first() {
    let comm = Arc::new(Communicator::new());
    let listener = {
        let comm = comm.clone();
        ThreadBuilder::new("listener").spawn(move || Current::exit(comm.listen()))
    };
    wait_for_state(listener.tid, ThreadState::Parked);
    assert_eq!(comm.waiting_listeners(), 1);

    // A listener is already waiting, so this does not block.
    comm.speak(42);
    assert_eq!(comm.waiting_listeners(), 0);
    assert_eq!(listener.join(), 42);
}

#[grade]
pub fn speaker_first() {
    let comm = Arc::new(Communicator::new());
    let speaker = {
        let comm = comm.clone();
        ThreadBuilder::new("speaker").spawn(move || comm.speak(7))
    };
    wait_for_state(speaker.tid, ThreadState::Parked);
    assert_eq!(comm.waiting_speakers(), 1);

    assert_eq!(comm.listen(), 7);
    assert_eq!(comm.waiting_speakers(), 0);
    assert_eq!(speaker.join(), 0);
}

#[grade]
pub fn speaker_waits_for_listener() {
    let comm = Arc::new(Communicator::new());
    let heard = Arc::new(AtomicBool::new(false));
    let speaker = {
        let (comm, heard) = (comm.clone(), heard.clone());
        ThreadBuilder::new("speaker").spawn(move || {
            comm.speak(1);
            heard.store(true, Ordering::SeqCst);
        })
    };
    wait_for_state(speaker.tid, ThreadState::Parked);
    yield_n(100);
    assert!(!heard.load(Ordering::SeqCst));

    assert_eq!(comm.listen(), 1);
    assert_eq!(speaker.join(), 0);
    assert!(heard.load(Ordering::SeqCst));
}

#[grade]
pub fn speakers_in_order() {
    const SPEAKERS: i32 = 4;
    let comm = Arc::new(Communicator::new());
    let speakers = (0..SPEAKERS)
        .map(|word| {
            let comm = comm.clone();
            let handle =
                ThreadBuilder::new(format!("speaker{word}")).spawn(move || comm.speak(word));
            wait_for_state(handle.tid, ThreadState::Parked);
            handle
        })
        .collect::<Vec<JoinHandle>>();
    assert_eq!(comm.waiting_speakers(), SPEAKERS as usize);

    for word in 0..SPEAKERS {
        assert_eq!(comm.listen(), word);
    }
    for speaker in speakers {
        assert_eq!(speaker.join(), 0);
    }
}

#[derive(Clone, Copy)]
enum Arrival {
    SpeakersFirst,
    ListenersFirst,
    Interleaved,
}

fn many_to_many(arrival: Arrival) {
    const PAIRS: i32 = 8;
    let comm = Arc::new(Communicator::new());
    let heard = Arc::new(Lock::new(Vec::new()));

    let speaker = |word: i32| {
        let comm = comm.clone();
        ThreadBuilder::new(format!("speaker{word}")).spawn(move || comm.speak(word * 10))
    };
    let listener = |i: i32| {
        let (comm, heard) = (comm.clone(), heard.clone());
        ThreadBuilder::new(format!("listener{i}")).spawn(move || {
            let word = comm.listen();
            let mut heard = heard.acquire();
            heard.push(word);
            heard.release();
        })
    };

    let mut handles = Vec::new();
    match arrival {
        Arrival::SpeakersFirst => {
            handles.extend((0..PAIRS).map(speaker));
            handles.extend((0..PAIRS).map(listener));
        }
        Arrival::ListenersFirst => {
            handles.extend((0..PAIRS).map(listener));
            handles.extend((0..PAIRS).map(speaker));
        }
        Arrival::Interleaved => {
            for i in 0..PAIRS {
                if i % 2 == 0 {
                    handles.push(speaker(i));
                    handles.push(listener(i));
                } else {
                    handles.push(listener(i));
                    handles.push(speaker(i));
                }
            }
        }
    }
    for handle in handles {
        assert_eq!(handle.join(), 0);
    }

    assert_eq!(comm.waiting_speakers(), 0);
    assert_eq!(comm.waiting_listeners(), 0);
    let mut heard = heard.acquire();
    heard.sort();
    assert_eq!(*heard, (0..PAIRS).map(|w| w * 10).collect::<Vec<_>>());
    heard.release();
}

#[grade(timer_interval = 20)]
pub fn many_speakers_first() {
    many_to_many(Arrival::SpeakersFirst);
}

#[grade(timer_interval = 20)]
pub fn many_listeners_first() {
    many_to_many(Arrival::ListenersFirst);
}

#[grade(timer_interval = 20)]
pub fn many_interleaved() {
    many_to_many(Arrival::Interleaved);
}
