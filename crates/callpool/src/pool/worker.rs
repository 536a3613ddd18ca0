use crate::{
    error::{Error, RemoteError, Result},
    ingress::IngressReceiver,
    payload::Payload,
    remote::RemoteCall,
    retry::RetryScheduler,
    sink::CompletionSink,
};
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Error recorded on a payload whose remote call panicked.
const REMOTE_PANICKED: &str = "remote call panicked";

/// Everything a worker needs, cloned once per worker.
pub(crate) struct WorkerContext<R> {
    pub(crate) ingress: IngressReceiver,
    pub(crate) remote: Arc<R>,
    pub(crate) sink: Arc<dyn CompletionSink>,
    pub(crate) retry: RetryScheduler,
    pub(crate) shutdown: CancellationToken,
}

impl<R> Clone for WorkerContext<R> {
    fn clone(&self) -> Self {
        Self {
            ingress: self.ingress.clone(),
            remote: Arc::clone(&self.remote),
            sink: Arc::clone(&self.sink),
            retry: self.retry.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Worker task responsible for executing payloads.
///
/// The worker takes payloads from the shared ingress queue until the shutdown
/// token is cancelled. Each payload gets exactly one attempt per dequeue; the
/// worker never waits out a backoff itself.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used for logs/tracing).
/// - `ctx`: Shared queue, remote call, sink and retry scheduler.
///
/// # Errors
///
/// Returns [`Error::IngressClosed`] if the queue closes before shutdown was
/// requested.
pub(crate) async fn worker_loop<R: RemoteCall>(
    worker_id: usize,
    ctx: WorkerContext<R>,
) -> Result<()> {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    loop {
        let payload = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break,
            next = ctx.ingress.get() => match next {
                Some(payload) => payload,
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} saw the ingress queue close before shutdown");
                    return Err(Error::IngressClosed);
                }
            },
        };

        execute(worker_id, payload, &ctx).await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");

    Ok(())
}

/// Runs one attempt of `payload` and routes the outcome.
///
/// - Success: the payload is `Succeeded` and goes to the sink.
/// - Transient failure with budget left: the payload goes to the retry
///   scheduler with its computed backoff.
/// - Otherwise: the payload is `Failed` with the last error and goes to the
///   sink. A panicking remote call lands here as a terminal error.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
async fn execute<R: RemoteCall>(worker_id: usize, mut payload: Payload, ctx: &WorkerContext<R>) {
    payload.begin_attempt();
    let outcome = AssertUnwindSafe(ctx.remote.call(payload.endpoint(), payload.data()))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "Worker {worker_id}: remote call for payload {} panicked",
                payload.id()
            );
            Err(RemoteError::terminal(REMOTE_PANICKED))
        });

    match outcome {
        Ok(response) => {
            payload.succeed(response);
            ctx.sink.complete(payload);
        }
        Err(err) if err.is_retryable() && payload.retry_config().allows_retry(payload.attempt()) => {
            let delay = payload.retry_config().backoff(payload.attempt());
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Worker {worker_id}: payload {} attempt {} failed ({err}), retrying in {delay:?}",
                payload.id(),
                payload.attempt()
            );
            if let Err(_payload) = ctx.retry.schedule(payload, delay) {
                // Only reachable while shutting down.
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Worker {worker_id}: retry scheduler stopped, dropping payload {}",
                    _payload.id()
                );
            }
        }
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Worker {worker_id}: payload {} failed after {} attempts: {err}",
                payload.id(),
                payload.attempt()
            );
            payload.fail(err);
            ctx.sink.complete(payload);
        }
    }
}
