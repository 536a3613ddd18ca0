use super::{CompletionSink, Outlet};
use crate::{payload::Payload, sequencer::Sequencer};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug)]
struct Window {
    next_expected: u64,
    pending: BTreeMap<u64, Payload>,
}

/// Restores submission order over out-of-order completions.
///
/// Fast path: the payload carrying `next_expected` is released directly,
/// followed by any buffered run of successors. Slow path: anything ahead of
/// `next_expected` waits in a map keyed by id.
///
/// Releases happen while the window lock is held, so callbacks observe the
/// same ascending order as the consumer. Execution is never serialized; only
/// the hand-off is.
#[derive(Debug)]
pub(crate) struct ReorderBuffer {
    outlet: Arc<Outlet>,
    window: Mutex<Window>,
}

impl ReorderBuffer {
    pub(crate) fn new(outlet: Arc<Outlet>) -> Self {
        Self {
            outlet,
            window: Mutex::new(Window {
                next_expected: Sequencer::FIRST,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Number of completed payloads waiting on a predecessor.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.window.lock().pending.len()
    }
}

impl CompletionSink for ReorderBuffer {
    fn complete(&self, payload: Payload) {
        let mut window = self.window.lock();
        let id = payload.id();

        if id < window.next_expected || window.pending.contains_key(&id) {
            debug_assert!(false, "payload {id} completed twice");
            #[cfg(feature = "tracing")]
            tracing::error!("Dropping duplicate completion for payload {id}");
            return;
        }

        if id != window.next_expected {
            window.pending.insert(id, payload);
            return;
        }

        self.outlet.release(payload);
        window.next_expected += 1;

        loop {
            let next = window.next_expected;
            let Some(successor) = window.pending.remove(&next) else {
                break;
            };
            self.outlet.release(successor);
            window.next_expected += 1;
        }
    }
}
