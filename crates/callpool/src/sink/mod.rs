//! Completion delivery.
//!
//! Workers hand every terminal [`Payload`] to a [`CompletionSink`]. The sink
//! decides *when* the payload is released; the shared [`Outlet`] performs the
//! release itself:
//!
//! 1. run the payload's callback, if any,
//! 2. push it onto the delivery channel read by
//!    [`Completions`](crate::Completions),
//! 3. settle the outstanding count, emitting the end-of-stream sentinel if
//!    this was the last piece of work.
//!
//! ## Implementations
//!
//! - [`UnorderedSink`] - releases immediately, in completion order.
//! - [`ReorderBuffer`] - withholds payloads until every lower id has been
//!   released, restoring submission order.

mod reorder;
mod unordered;

pub(crate) use reorder::ReorderBuffer;
pub(crate) use unordered::UnorderedSink;

use crate::{payload::Payload, tracker::Tracker};
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Message on the delivery channel.
#[derive(Debug)]
pub(crate) enum Delivery {
    Completed(Payload),
    End,
}

/// Receives terminal payloads from the workers.
pub(crate) trait CompletionSink: Send + Sync {
    fn complete(&self, payload: Payload);
}

/// The tail of the pipeline shared by the sinks, producers and client.
#[derive(Debug)]
pub(crate) struct Outlet {
    tx: mpsc::UnboundedSender<Delivery>,
    tracker: Tracker,
    shutdown: CancellationToken,
}

impl Outlet {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Delivery>,
        tracker: Tracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tx,
            tracker,
            shutdown,
        }
    }

    pub(crate) const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub(crate) const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Hands a terminal payload to its callback and the consumer.
    ///
    /// A panicking callback is contained here; the payload is still delivered
    /// and settled.
    pub(crate) fn release(&self, payload: Payload) {
        debug_assert!(payload.state().is_terminal());
        if let Some(callback) = payload.callback() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&payload))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!("Callback for payload {} panicked", payload.id());
            }
        }
        // A dropped `Completions` only means nobody is pulling; callbacks and
        // accounting still run.
        let _ = self.tx.send(Delivery::Completed(payload));
        if self.tracker.release() {
            self.finish();
        }
    }

    /// Emits the sentinel and stops the background tasks. Callers must only
    /// invoke this after the tracker reported the stream as ended.
    pub(crate) fn finish(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("All work released, signaling end of stream");
        let _ = self.tx.send(Delivery::End);
        self.shutdown.cancel();
    }

    /// Ends the stream now, abandoning anything still outstanding.
    pub(crate) fn abort(&self) {
        if self.tracker.force_end() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Ending stream with {} payloads outstanding",
                self.tracker.snapshot().outstanding
            );
            let _ = self.tx.send(Delivery::End);
        }
        self.shutdown.cancel();
    }
}
