//! Outstanding-work accounting and end-of-stream detection.
//!
//! The stream ends exactly once, when all three hold:
//!
//! - the client is closing (a producer with `stop_at_end` finished, or
//!   [`Client::close`](crate::Client::close) was called),
//! - no producer is still running,
//! - every admitted payload has been released to the consumer.
//!
//! All counters sit under one lock so that admitting a payload and deciding
//! the stream is over can never interleave.

use crate::error::{Error, Result};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct State {
    outstanding: usize,
    producers: usize,
    closing: bool,
    ended: bool,
}

impl State {
    /// Flips `ended` if the stream is over. Returns `true` only for the call
    /// that flipped it.
    fn try_end(&mut self) -> bool {
        if !self.ended && self.closing && self.producers == 0 && self.outstanding == 0 {
            self.ended = true;
            return true;
        }
        false
    }
}

/// A point-in-time view of the tracker, used for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub outstanding: usize,
    pub producers: usize,
    pub closing: bool,
    pub ended: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    state: Mutex<State>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Counts a new payload as outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once the stream has ended.
    pub(crate) fn admit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(Error::Closed);
        }
        state.outstanding += 1;
        Ok(())
    }

    /// Records that a payload reached the consumer. Returns `true` if this
    /// release ended the stream.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.outstanding > 0, "release without matching admit");
        state.outstanding = state.outstanding.saturating_sub(1);
        state.try_end()
    }

    pub(crate) fn producer_started(&self) {
        self.state.lock().producers += 1;
    }

    /// Records a finished producer. Returns `true` if this ended the stream.
    pub(crate) fn producer_finished(&self, stop_at_end: bool) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.producers > 0, "producer finished twice");
        state.producers = state.producers.saturating_sub(1);
        if stop_at_end {
            state.closing = true;
        }
        state.try_end()
    }

    /// Stops accepting new producers' work once the current work drains.
    /// Returns `true` if this ended the stream.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        state.closing = true;
        state.try_end()
    }

    /// Ends the stream regardless of outstanding work. Returns `true` if it
    /// was not already ended.
    pub(crate) fn force_end(&self) -> bool {
        let mut state = self.state.lock();
        state.closing = true;
        !core::mem::replace(&mut state.ended, true)
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub(crate) fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            outstanding: state.outstanding,
            producers: state.producers,
            closing: state.closing,
            ended: state.ended,
        }
    }
}
