//! The submission side of the pipeline.
//!
//! [`Client::new`] wires up the whole dispatch core and returns the two ends
//! of it:
//!
//! ```text
//! producer ─► Client::request ─► ingress queue ─► workers ─► sink ─► Completions
//!                                      ▲             │
//!                                      └── retry ◄───┘
//! ```
//!
//! ## Responsibilities
//!
//! - Validate the configuration and spawn the worker pool.
//! - Turn [`Request`]s into [`Payload`]s: merge templates, resolve retry
//!   overrides, assign ids.
//! - Run production logic off the caller's task.
//! - Close the client and shut the pool down.

use crate::{
    completions::Completions,
    config::{ClientConfig, DeliveryOrder},
    error::{Error, Result},
    ingress::{self, IngressSender},
    payload::Payload,
    pool::WorkerPool,
    producer::{self, ProducerGuard, ProducerHandle, ProducerOptions, ProducerOutcome},
    remote::RemoteCall,
    request::{self, Request},
    sequencer::Sequencer,
    sink::{CompletionSink, Outlet, ReorderBuffer, UnorderedSink},
    tracker::{Tracker, TrackerSnapshot},
};
use core::future::Future;
use std::sync::Arc;
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// Handle for submitting work.
///
/// Cheap to clone; every clone feeds the same pipeline. Dropping the last
/// clone closes the client, so the stream ends once outstanding work drains.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    sequencer: Sequencer,
    ingress: IngressSender,
    outlet: Arc<Outlet>,
    pool: WorkerPool,
    runtime: Handle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.outlet.tracker().close() {
            self.outlet.finish();
        }
    }
}

impl Client {
    /// Starts a client executing calls through `remote`.
    ///
    /// Spawns `config.concurrency` workers and the retry scheduler on the
    /// current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not
    /// validate.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<R: RemoteCall>(config: ClientConfig, remote: R) -> Result<(Self, Completions)> {
        config.validate()?;

        let runtime = Handle::current();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let outlet = Arc::new(Outlet::new(
            delivery_tx,
            Tracker::new(),
            CancellationToken::new(),
        ));

        let sink: Arc<dyn CompletionSink> = match config.order {
            DeliveryOrder::Unordered => Arc::new(UnorderedSink::new(Arc::clone(&outlet))),
            DeliveryOrder::Ordered => Arc::new(ReorderBuffer::new(Arc::clone(&outlet))),
        };

        let (ingress_tx, ingress_rx) = ingress::channel(config.queue_capacity);
        let pool = WorkerPool::spawn(
            config.concurrency,
            remote,
            ingress_tx.clone(),
            ingress_rx,
            sink,
            Arc::clone(&outlet),
            config.shutdown_timeout,
        );

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Started client with {} workers, queue capacity {}, {:?} delivery",
            config.concurrency,
            config.queue_capacity,
            config.order
        );

        let inner = Inner {
            config,
            sequencer: Sequencer::new(),
            ingress: ingress_tx,
            outlet,
            pool,
            runtime,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            Completions::new(delivery_rx),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Submits one call and returns the id assigned to it.
    ///
    /// Waits while the ingress queue is full. The id is assigned only once a
    /// queue slot is secured, so a cancelled `request` future never leaves a
    /// gap in the id sequence.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if neither the request nor the client names
    ///   an endpoint, or a retry override is unusable.
    /// - [`Error::Closed`] if the stream already ended.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn request(&self, request: impl Into<Request>) -> Result<u64> {
        let inner = &self.inner;
        let request = request.into();

        let endpoint = request
            .endpoint
            .clone()
            .or_else(|| inner.config.endpoint.clone())
            .ok_or_else(|| Error::InvalidRequest {
                reason: "no endpoint given and the client has no default".to_string(),
            })?;

        let retry = request.retry_config(&inner.config.retry);
        if !retry.retry_multiplier.is_finite() || retry.retry_multiplier < 0.0 {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "retry_multiplier must be finite and >= 0, got {}",
                    retry.retry_multiplier
                ),
            });
        }

        if inner.outlet.tracker().is_ended() {
            return Err(Error::Closed);
        }

        let slot = inner
            .ingress
            .reserve()
            .await
            .ok_or_else(|| Error::ChannelError {
                context: "ingress queue closed".to_string(),
            })?;

        // Nothing below may await or fail after `admit`: the payload is
        // counted as outstanding and must reach the queue.
        inner.outlet.tracker().admit()?;
        let id = inner.sequencer.next_id();
        let payload = Payload::new(
            id,
            endpoint,
            request::merge(&inner.config.data_template, request.data),
            request::merge(&inner.config.metadata_template, request.metadata),
            request.callback,
            retry,
        );
        slot.put(payload);

        Ok(id)
    }

    /// Blocking variant of [`Client::request`] for synchronous producers, e.g.
    /// logic started with [`Client::run_blocking_request_function`].
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_request(&self, request: impl Into<Request>) -> Result<u64> {
        self.inner.runtime.block_on(self.request(request))
    }

    /// Runs async production logic on its own task and closes the client
    /// when it finishes.
    ///
    /// ```no_run
    /// # async fn run(client: callpool::Client) {
    /// use callpool::Request;
    /// use serde_json::json;
    ///
    /// let producer = client.run_request_function(|client| async move {
    ///     for id in 1..=100 {
    ///         client
    ///             .request(Request::from_value(json!({"prompt": id})).meta("id", id))
    ///             .await?;
    ///     }
    ///     Ok::<_, callpool::Error>(())
    /// });
    /// # let _ = producer.await;
    /// # }
    /// ```
    pub fn run_request_function<F, Fut>(&self, f: F) -> ProducerHandle
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ProducerOutcome,
    {
        self.run_request_function_with(ProducerOptions::default(), f)
    }

    /// Like [`Client::run_request_function`] with explicit options.
    pub fn run_request_function_with<F, Fut>(&self, options: ProducerOptions, f: F) -> ProducerHandle
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ProducerOutcome,
    {
        let guard = ProducerGuard::register(Arc::clone(&self.inner.outlet), options);
        let client = self.clone();
        let handle = self.inner.runtime.spawn(async move {
            let _guard = guard;
            producer::report(f(client).await.into_outcome())
        });
        ProducerHandle::new(handle)
    }

    /// Runs synchronous production logic on the blocking thread pool. The
    /// logic submits with [`Client::blocking_request`].
    pub fn run_blocking_request_function<F, O>(&self, f: F) -> ProducerHandle
    where
        F: FnOnce(Self) -> O + Send + 'static,
        O: ProducerOutcome,
    {
        self.run_blocking_request_function_with(ProducerOptions::default(), f)
    }

    /// Like [`Client::run_blocking_request_function`] with explicit options.
    pub fn run_blocking_request_function_with<F, O>(
        &self,
        options: ProducerOptions,
        f: F,
    ) -> ProducerHandle
    where
        F: FnOnce(Self) -> O + Send + 'static,
        O: ProducerOutcome,
    {
        let guard = ProducerGuard::register(Arc::clone(&self.inner.outlet), options);
        let client = self.clone();
        let handle = self.inner.runtime.spawn_blocking(move || {
            let _guard = guard;
            producer::report(f(client).into_outcome())
        });
        ProducerHandle::new(handle)
    }

    /// Marks the client as closing: the stream ends once running producers
    /// finish and outstanding work drains. Submissions stay possible until
    /// then.
    pub fn close(&self) {
        if self.inner.outlet.tracker().close() {
            self.inner.outlet.finish();
        }
    }

    /// Closes the client, waits for outstanding work (bounded by
    /// [`ClientConfig::shutdown_timeout`]) and joins the worker pool.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error reported by a worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.pool.shutdown().await
    }

    /// Returns `true` once the end-of-stream sentinel has been emitted.
    pub fn is_ended(&self) -> bool {
        self.inner.outlet.tracker().is_ended()
    }

    /// Point-in-time counters of outstanding work and running producers.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.inner.outlet.tracker().snapshot()
    }

    /// Number of submissions the ingress queue can take without waiting.
    pub fn free_slots(&self) -> usize {
        self.inner.ingress.free_slots()
    }

    /// Number of ids handed out so far.
    pub fn submitted(&self) -> u64 {
        self.inner.sequencer.issued()
    }
}
