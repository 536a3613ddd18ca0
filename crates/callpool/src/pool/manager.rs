//! Fixed-size pool of asynchronous workers.
//!
//! This module defines the [`WorkerPool`] struct, which spawns `concurrency`
//! workers over one shared ingress queue together with the retry scheduler
//! that feeds it, and coordinates their shutdown through a shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! Idle workers compete for the next payload, so a slow call only ever
//! occupies the worker running it.

use super::worker::{WorkerContext, worker_loop};
use crate::{
    error::{Error, Result},
    ingress::{IngressReceiver, IngressSender},
    remote::RemoteCall,
    retry::RetryScheduler,
    sink::{CompletionSink, Outlet},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};

/// How long a worker may keep running after the shutdown token is cancelled
/// before it is aborted. Only a worker blocked inside a remote call can take
/// this long.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) struct WorkerPool {
    workers: Mutex<Vec<JoinHandle<Result<()>>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    outlet: Arc<Outlet>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `concurrency` workers and the retry scheduler.
    ///
    /// All tasks stop once the outlet's shutdown token is cancelled, which
    /// happens automatically at end-of-stream.
    pub(crate) fn spawn<R: RemoteCall>(
        concurrency: usize,
        remote: R,
        ingress_tx: IngressSender,
        ingress_rx: IngressReceiver,
        sink: Arc<dyn CompletionSink>,
        outlet: Arc<Outlet>,
        shutdown_timeout: Duration,
    ) -> Self {
        let shutdown = outlet.shutdown_token().clone();
        let (retry, scheduler) = RetryScheduler::spawn(ingress_tx, shutdown.clone());

        let ctx = WorkerContext {
            ingress: ingress_rx,
            remote: Arc::new(remote),
            sink,
            retry,
            shutdown,
        };

        let workers = (0..concurrency)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, ctx.clone())))
            .collect();

        Self {
            workers: Mutex::new(workers),
            scheduler: Mutex::new(Some(scheduler)),
            outlet,
            shutdown_timeout,
        }
    }

    /// Gracefully shuts down the pool.
    ///
    /// - Closes the client so the stream can end once work drains.
    /// - Waits (up to `shutdown_timeout`) for end-of-stream.
    /// - On timeout, ends the stream anyway, abandoning outstanding payloads.
    /// - Joins every worker and the retry scheduler, aborting workers still
    ///   stuck in a remote call after a grace period.
    ///
    /// Calling it again after a completed shutdown is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first fatal worker error, or [`Error::ChannelError`] if a
    /// worker task panicked.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        // === Phase 0: Stop accepting new work once producers finish ===
        #[cfg(feature = "tracing")]
        tracing::info!("Closing client, waiting for outstanding work");
        if self.outlet.tracker().close() {
            self.outlet.finish();
        }

        // === Phase 1: Wait for outstanding work to drain ===
        let token = self.outlet.shutdown_token().clone();
        match timeout(self.shutdown_timeout, token.cancelled()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All outstanding work drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} payloads outstanding)",
                    self.outlet.tracker().snapshot().outstanding
                );
                // === Phase 2: Abandon whatever is left ===
                self.outlet.abort();
            }
        }

        // === Phase 3: Join the background tasks ===
        let workers = core::mem::take(&mut *self.workers.lock());
        let scheduler = self.scheduler.lock().take();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Waiting up to {:?} per worker for in-flight calls",
            WORKER_JOIN_TIMEOUT
        );

        let joins = workers.into_iter().enumerate().map(|(_i, mut handle)| async move {
            match timeout(WORKER_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_err)) => Err(Error::ChannelError {
                    context: format!("worker task failed: {join_err}"),
                }),
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} still busy, aborting it");
                    handle.abort();
                    Ok(())
                }
            }
        });

        let mut first_err = None;
        for outcome in futures::future::join_all(joins).await {
            if let Err(err) = outcome {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker exited with error: {err}");
                first_err.get_or_insert(err);
            }
        }

        if let Some(scheduler) = scheduler {
            if let Err(join_err) = scheduler.await {
                first_err.get_or_insert(Error::ChannelError {
                    context: format!("retry scheduler failed: {join_err}"),
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        first_err.map_or(Ok(()), Err)
    }
}
