//! Backoff scheduling for failed-but-retryable payloads.
//!
//! Workers never sleep through a backoff. They hand the payload to a single
//! scheduler task over an unbounded channel and go straight back to the
//! ingress queue. The scheduler parks payloads in a [`DelayQueue`] and, as
//! each delay expires, puts the payload back on the ingress queue with its
//! original id.

use crate::{
    ingress::IngressSender,
    payload::{Payload, PayloadState},
};
use core::time::Duration;
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, time::DelayQueue};

/// Handle used by workers to schedule retries.
#[derive(Clone, Debug)]
pub(crate) struct RetryScheduler {
    tx: mpsc::UnboundedSender<(Payload, Duration)>,
}

impl RetryScheduler {
    /// Spawns the scheduler task feeding `ingress`.
    ///
    /// The task runs until `shutdown` is cancelled. Payloads still waiting at
    /// that point are dropped.
    pub(crate) fn spawn(
        ingress: IngressSender,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(scheduler_loop(rx, ingress, shutdown));
        (Self { tx }, handle)
    }

    /// Schedules `payload` to re-enter the ingress queue after `delay`.
    ///
    /// On a stopped scheduler the payload is handed back.
    pub(crate) fn schedule(&self, mut payload: Payload, delay: Duration) -> Result<(), Payload> {
        payload.advance(PayloadState::RetryScheduled);
        self.tx
            .send((payload, delay))
            .map_err(|mpsc::error::SendError((payload, _))| payload)
    }
}

async fn scheduler_loop(
    mut rx: mpsc::UnboundedReceiver<(Payload, Duration)>,
    ingress: IngressSender,
    shutdown: CancellationToken,
) {
    let mut waiting: DelayQueue<Payload> = DelayQueue::new();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some((payload, delay)) = rx.recv() => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Retrying payload {} (attempt {}) in {:?}",
                    payload.id(),
                    payload.attempt(),
                    delay
                );
                waiting.insert(payload, delay);
            }
            Some(expired) = waiting.next(), if !waiting.is_empty() => {
                let payload = expired.into_inner();
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    res = ingress.put(payload) => {
                        if let Err(_payload) = res {
                            #[cfg(feature = "tracing")]
                            tracing::error!(
                                "Ingress closed, dropping retry of payload {}",
                                _payload.id()
                            );
                        }
                    }
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    {
        if !waiting.is_empty() {
            tracing::warn!("Retry scheduler stopped with {} payloads waiting", waiting.len());
        }
    }
}
