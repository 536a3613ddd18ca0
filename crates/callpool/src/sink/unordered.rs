use super::{CompletionSink, Outlet};
use crate::payload::Payload;
use std::sync::Arc;

/// Releases payloads the moment a worker finishes them.
///
/// The consumer observes completion order, which is unrelated to submission
/// order.
#[derive(Debug)]
pub(crate) struct UnorderedSink {
    outlet: Arc<Outlet>,
}

impl UnorderedSink {
    pub(crate) const fn new(outlet: Arc<Outlet>) -> Self {
        Self { outlet }
    }
}

impl CompletionSink for UnorderedSink {
    fn complete(&self, payload: Payload) {
        self.outlet.release(payload);
    }
}
