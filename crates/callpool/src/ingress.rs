//! Bounded ingress queue between producers and the worker pool.
//!
//! The queue is a bounded Tokio MPSC channel. Producers hold clones of
//! [`IngressSender`]; the single receiver is shared by every worker behind an
//! async mutex, so whichever worker is idle first takes the next payload.
//!
//! The bound is the backpressure mechanism: once `capacity` payloads are
//! waiting, [`IngressSender::reserve`] parks the producer until a worker
//! dequeues one.

use crate::payload::{Payload, PayloadState};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

pub(crate) fn channel(capacity: usize) -> (IngressSender, IngressReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        IngressSender { tx },
        IngressReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Clone, Debug)]
pub(crate) struct IngressSender {
    tx: mpsc::Sender<Payload>,
}

/// A reserved slot in the ingress queue.
///
/// Holding a slot guarantees the next [`IngressSlot::put`] cannot block or
/// fail, so work that must not be lost (id assignment, outstanding count) is
/// done only after a slot has been secured.
pub(crate) struct IngressSlot<'a> {
    permit: mpsc::Permit<'a, Payload>,
}

impl IngressSlot<'_> {
    /// Moves the payload into the queue, marking it `Queued`.
    pub(crate) fn put(self, mut payload: Payload) {
        payload.advance(PayloadState::Queued);
        self.permit.send(payload);
    }
}

impl IngressSender {
    /// Waits for a free slot.
    ///
    /// Cancel safe: dropping the future before it resolves gives up the place
    /// in line without enqueueing anything.
    ///
    /// Returns `None` once the receiving side has gone away.
    pub(crate) async fn reserve(&self) -> Option<IngressSlot<'_>> {
        self.tx
            .reserve()
            .await
            .ok()
            .map(|permit| IngressSlot { permit })
    }

    /// Waits for a free slot and enqueues `payload`.
    ///
    /// On a closed queue the payload is handed back to the caller.
    pub(crate) async fn put(&self, payload: Payload) -> Result<(), Payload> {
        match self.reserve().await {
            Some(slot) => {
                slot.put(payload);
                Ok(())
            }
            None => Err(payload),
        }
    }

    /// Number of free slots right now.
    pub(crate) fn free_slots(&self) -> usize {
        self.tx.capacity()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct IngressReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Payload>>>,
}

impl IngressReceiver {
    /// Waits for the next payload.
    ///
    /// Returns `None` once every sender is dropped and the queue is empty.
    /// The lock is held only while waiting, never while a payload is being
    /// executed.
    pub(crate) async fn get(&self) -> Option<Payload> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Data, RetryConfig};
    use core::time::Duration;

    fn payload(id: u64) -> Payload {
        Payload::new(id, "e".into(), Data::new(), Data::new(), None, RetryConfig::default())
    }

    #[tokio::test]
    async fn fifo_and_marks_queued() {
        let (tx, rx) = channel(4);
        for id in 1..=3 {
            assert!(tx.put(payload(id)).await.is_ok());
        }
        for id in 1..=3 {
            let p = rx.get().await.unwrap();
            assert_eq!(p.id(), id);
            assert_eq!(p.state(), PayloadState::Queued);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn put_waits_while_full() {
        let (tx, rx) = channel(2);
        tx.put(payload(1)).await.unwrap();
        tx.put(payload(2)).await.unwrap();
        assert_eq!(tx.free_slots(), 0);

        let blocked = tokio::time::timeout(Duration::from_secs(1), tx.put(payload(3))).await;
        assert!(blocked.is_err(), "third put must wait for a free slot");

        assert_eq!(rx.get().await.map(|p| p.id()), Some(1));
        assert!(tx.put(payload(3)).await.is_ok());
    }

    #[tokio::test]
    async fn get_signals_end_once_senders_are_gone() {
        let (tx, rx) = channel(1);
        tx.put(payload(1)).await.unwrap();
        drop(tx);
        assert_eq!(rx.get().await.map(|p| p.id()), Some(1));
        assert!(rx.get().await.is_none());
    }

    #[tokio::test]
    async fn put_hands_back_payload_when_closed() {
        let (tx, rx) = channel(1);
        drop(rx);
        let rejected = tx.put(payload(7)).await.unwrap_err();
        assert_eq!(rejected.id(), 7);
        assert_eq!(rejected.state(), PayloadState::New);
    }
}
