//! Running production logic off the caller's task.
//!
//! Submitting work can wait arbitrarily long on a full ingress queue, so the
//! logic that submits it runs on its own Tokio task (or on the blocking pool
//! for synchronous code) while the caller consumes completions.
//!
//! A running producer keeps the stream open. When it finishes (normally, with
//! an error, or by panicking) it is deregistered, and with
//! [`ProducerOptions::stop_at_end`] the client is closed so the stream ends
//! once the work submitted so far drains.

use crate::{
    error::{Error, Result},
    sink::Outlet,
};
use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Options for a producer started through
/// [`Client::run_request_function_with`](crate::Client::run_request_function_with).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerOptions {
    /// Close the client when this producer finishes.
    pub stop_at_end: bool,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self { stop_at_end: true }
    }
}

/// Result types production logic may return.
///
/// Implemented for `()` (infallible logic) and for `Result<(), E>` with any
/// displayable error.
pub trait ProducerOutcome {
    /// # Errors
    ///
    /// Returns [`Error::Producer`] carrying the rendered error.
    fn into_outcome(self) -> Result<()>;
}

impl ProducerOutcome for () {
    fn into_outcome(self) -> Result<()> {
        Ok(())
    }
}

impl<E: fmt::Display> ProducerOutcome for core::result::Result<(), E> {
    fn into_outcome(self) -> Result<()> {
        self.map_err(|e| Error::Producer(e.to_string()))
    }
}

/// Deregisters a producer when dropped, including during a panic unwind.
pub(crate) struct ProducerGuard {
    outlet: Arc<Outlet>,
    options: ProducerOptions,
}

impl ProducerGuard {
    /// Registers a producer. Must be called before the producer is spawned so
    /// the stream cannot end in between.
    pub(crate) fn register(outlet: Arc<Outlet>, options: ProducerOptions) -> Self {
        outlet.tracker().producer_started();
        Self { outlet, options }
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if self
            .outlet
            .tracker()
            .producer_finished(self.options.stop_at_end)
        {
            self.outlet.finish();
        }
    }
}

/// Handle to a running producer.
///
/// Awaiting it yields the producer's own result. Dropping it detaches the
/// producer, which keeps running.
#[derive(Debug)]
#[must_use = "dropping the handle discards the producer's result"]
pub struct ProducerHandle {
    handle: JoinHandle<Result<()>>,
}

impl ProducerHandle {
    pub(crate) const fn new(handle: JoinHandle<Result<()>>) -> Self {
        Self { handle }
    }

    /// Returns `true` once the production logic has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ProducerHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => Err(Error::ProducerPanicked),
            Err(join_err) => Err(Error::Producer(join_err.to_string())),
        })
    }
}

/// Wraps the outcome with logging of failures.
pub(crate) fn report(outcome: Result<()>) -> Result<()> {
    #[cfg(feature = "tracing")]
    {
        if let Err(e) = &outcome {
            tracing::error!("Producer failed: {e}");
        }
    }
    outcome
}
