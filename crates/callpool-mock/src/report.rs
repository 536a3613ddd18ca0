use crate::telemetry;
use callpool::Payload;
use parking_lot::Mutex;

/// Running totals over released payloads.
///
/// Shared between the consumer loop and completion callbacks, which may run on
/// any worker.
#[derive(Debug, Default)]
pub struct Tally {
    inner: Mutex<Counts>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counts {
    pub succeeded: u64,
    pub failed: u64,
    /// Ids in the order they were released.
    pub released: Vec<u64>,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn is_ascending(&self) -> bool {
        self.released.windows(2).all(|w| w[0] < w[1])
    }
}

impl Tally {
    /// Logs one released payload and counts it.
    pub fn record(&self, payload: &Payload) {
        match (payload.response(), payload.error()) {
            (Some(response), _) => {
                tracing::info!(
                    id = payload.id(),
                    attempts = payload.attempt(),
                    "Response: {response}"
                );
            }
            (None, Some(err)) => {
                telemetry::increment_failures();
                tracing::warn!(
                    id = payload.id(),
                    attempts = payload.attempt(),
                    "Failed: {err}"
                );
            }
            (None, None) => {
                tracing::error!(id = payload.id(), "Released without an outcome");
            }
        }

        let mut counts = self.inner.lock();
        if payload.succeeded() {
            counts.succeeded += 1;
        } else {
            counts.failed += 1;
        }
        counts.released.push(payload.id());
    }

    pub fn snapshot(&self) -> Counts {
        self.inner.lock().clone()
    }
}
