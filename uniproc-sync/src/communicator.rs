//! # Communicator.
//!
//! A [`Communicator`] is a rendezvous point where one speaker hands a single
//! word to one listener. Neither side keeps going alone: a speaker returns
//! only once a listener has taken its word, and a listener returns only with
//! a word in hand.
//!
//! All of the channel state lives behind one [`Lock`]:
//!
//! - speakers that find no listener queue their word with a ticket and sleep
//!   until a listener has taken it. Listeners take queued words in ticket
//!   order, so speakers are served first come first served.
//! - listeners that find no word count themselves as idle and sleep. The next
//!   speaker drops its word in the hand-off queue for them and returns right
//!   away.
//!
//! Each word is returned by exactly one [`Communicator::listen`].
use crate::sync::{Condition, Lock};
use alloc::collections::vec_deque::VecDeque;
use uniproc::thread::Current;

#[derive(Default)]
struct Channel {
    /// Words of speakers that are still waiting for a listener.
    words: VecDeque<(u64, i32)>,
    tickets: u64,
    /// Number of queued words taken by listeners so far.
    delivered: u64,
    /// Words handed to idle listeners.
    handoff: VecDeque<i32>,
    idle_listeners: usize,
}

/// A synchronous channel of `i32` words.
pub struct Communicator {
    channel: Lock<Channel>,
    speakers: Condition,
    listeners: Condition,
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator {
    /// Creates a new communicator with nobody waiting.
    pub fn new() -> Self {
        let channel = Lock::new(Channel::default());
        let speakers = Condition::new(&channel);
        let listeners = Condition::new(&channel);
        Self {
            channel,
            speakers,
            listeners,
        }
    }

    /// Sends `word`, blocking until a listener receives it.
    pub fn speak(&self, word: i32) {
        let mut channel = self.channel.acquire();
        if channel.idle_listeners > 0 {
            channel.idle_listeners -= 1;
            channel.handoff.push_back(word);
            uniproc::debug!(
                "Communicator: thread {} hands {} to an idle listener.",
                Current::get_tid(),
                word
            );
            self.listeners.wake(&channel);
            channel.release();
            return;
        }

        let ticket = channel.tickets;
        channel.tickets += 1;
        channel.words.push_back((ticket, word));
        uniproc::debug!(
            "Communicator: thread {} waits for a listener with ticket {}.",
            Current::get_tid(),
            ticket
        );
        self.speakers
            .sleep_while(channel, |channel| channel.delivered <= ticket)
            .release();
    }

    /// Receives a word, blocking until a speaker sends one.
    pub fn listen(&self) -> i32 {
        let mut channel = self.channel.acquire();
        if let Some((ticket, word)) = channel.words.pop_front() {
            channel.delivered += 1;
            uniproc::debug!(
                "Communicator: thread {} takes {} of ticket {}.",
                Current::get_tid(),
                word,
                ticket
            );
            self.speakers.wake(&channel);
            channel.release();
            return word;
        }

        channel.idle_listeners += 1;
        loop {
            if let Some(word) = channel.handoff.pop_front() {
                channel.release();
                return word;
            }
            channel = self.listeners.sleep(channel);
        }
    }

    /// Number of speakers whose word has not been taken yet.
    pub fn waiting_speakers(&self) -> usize {
        let channel = self.channel.acquire();
        let n = channel.words.len();
        channel.release();
        n
    }

    /// Number of listeners waiting for a word.
    pub fn waiting_listeners(&self) -> usize {
        let channel = self.channel.acquire();
        let n = channel.idle_listeners;
        channel.release();
        n
    }
}
