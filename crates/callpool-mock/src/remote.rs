use crate::telemetry;
use callpool::{Data, RemoteCall, RemoteError};
use core::{future::Future, time::Duration};
use rand::Rng;
use serde_json::{Value, json};

/// Stand-in for a real API: every call sleeps a random latency and then fails
/// transiently with probability `failure_rate`.
#[derive(Debug, Clone, Copy)]
pub struct MockRemote {
    failure_rate: f64,
    max_latency: Duration,
}

impl MockRemote {
    /// `failure_rate` must lie within `[0, 1]`.
    pub const fn new(failure_rate: f64, max_latency: Duration) -> Self {
        Self {
            failure_rate,
            max_latency,
        }
    }

    /// Draws this attempt's latency in milliseconds and whether it fails.
    fn roll(&self) -> (u64, bool) {
        let mut rng = rand::rng();
        let max_ms = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        (
            rng.random_range(0..=max_ms),
            rng.random_bool(self.failure_rate),
        )
    }
}

impl RemoteCall for MockRemote {
    fn call(
        &self,
        endpoint: &str,
        data: &Data,
    ) -> impl Future<Output = Result<Value, RemoteError>> + Send {
        let (latency_ms, fails) = self.roll();
        let reply = json!({
            "endpoint": endpoint,
            "echo": data.get("prompt").cloned().unwrap_or(Value::Null),
            "latency_ms": latency_ms,
        });

        async move {
            telemetry::increment_attempts();
            telemetry::increment_inflight();
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
            telemetry::decrement_inflight();

            if fails {
                telemetry::increment_retries();
                Err(RemoteError::transient("mock remote unavailable"))
            } else {
                Ok(reply)
            }
        }
    }
}
