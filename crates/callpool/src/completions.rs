use crate::{payload::Payload, sink::Delivery};
use core::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use futures::Stream;
use tokio::sync::mpsc;

/// Consumer side of a [`Client`](crate::Client).
///
/// Yields every terminal [`Payload`] exactly once, in completion order or in
/// submission order depending on
/// [`DeliveryOrder`](crate::DeliveryOrder), and then ends. The end is reached
/// once the client is closed and all submitted work has been released.
///
/// Use it as an async iterator through [`Completions::recv`] or as a
/// [`Stream`]:
///
/// ```no_run
/// # async fn run(mut completions: callpool::Completions) {
/// use futures::StreamExt;
///
/// while let Some(payload) = completions.next().await {
///     println!("{} -> {:?}", payload.id(), payload.response());
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::UnboundedReceiver<Delivery>,
    done: bool,
}

impl Completions {
    pub(crate) const fn new(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { rx, done: false }
    }

    /// Waits for the next released payload.
    ///
    /// Returns `None` at end-of-stream, and on every call after it.
    pub async fn recv(&mut self) -> Option<Payload> {
        if self.done {
            return None;
        }
        let delivery = self.rx.recv().await;
        self.accept(delivery)
    }

    /// Blocking variant of [`Completions::recv`] for synchronous consumers.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<Payload> {
        if self.done {
            return None;
        }
        let delivery = self.rx.blocking_recv();
        self.accept(delivery)
    }

    /// Drains the stream, discarding results. Useful when payloads are
    /// handled by their callbacks. Returns the number of payloads drained.
    pub async fn pull_all(&mut self) -> usize {
        let mut drained = 0;
        while self.recv().await.is_some() {
            drained += 1;
        }
        drained
    }

    /// Blocking variant of [`Completions::pull_all`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_pull_all(&mut self) -> usize {
        let mut drained = 0;
        while self.blocking_recv().is_some() {
            drained += 1;
        }
        drained
    }

    /// Returns `true` once the end-of-stream sentinel has been observed.
    pub const fn is_done(&self) -> bool {
        self.done
    }

    fn accept(&mut self, delivery: Option<Delivery>) -> Option<Payload> {
        match delivery {
            Some(Delivery::Completed(payload)) => Some(payload),
            // All senders gone without a sentinel means every client handle
            // and task was dropped; nothing more can arrive.
            Some(Delivery::End) | None => {
                self.done = true;
                None
            }
        }
    }
}

impl Stream for Completions {
    type Item = Payload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let delivery = ready!(self.rx.poll_recv(cx));
        Poll::Ready(self.accept(delivery))
    }
}
