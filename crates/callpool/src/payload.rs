//! The unit of work and its lifecycle.
//!
//! A [`Payload`] is created inside [`Client::request`](crate::Client::request),
//! travels by value through the ingress queue, the workers, the retry
//! scheduler and the completion sink, and is finally handed to the consumer.
//! Because it moves rather than being shared, it lives in exactly one place at
//! a time.

use crate::error::RemoteError;
use core::{fmt, time::Duration};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Opaque parameter mapping passed to the remote call and attached as
/// metadata.
pub type Data = Map<String, Value>;

/// Completion hook invoked with the terminal payload when it is released.
///
/// Runs on the worker task that performs the release. For ordered delivery
/// that may be a worker finishing a later payload. It must return quickly: a
/// slow callback delays every payload released after it.
pub type Callback = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Lifecycle states of a [`Payload`].
///
/// ```text
/// New -> Queued -> InFlight -> Succeeded
///                           -> Failed
///                           -> RetryScheduled -> Queued
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PayloadState {
    New,
    Queued,
    InFlight,
    RetryScheduled,
    Succeeded,
    Failed,
}

impl PayloadState {
    /// Returns `true` for states with no outgoing transition.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Queued)
                | (Self::Queued, Self::InFlight)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::RetryScheduled)
                | (Self::InFlight, Self::Failed)
                | (Self::RetryScheduled, Self::Queued)
        )
    }
}

/// Retry budget and backoff curve of a single payload.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub wait_interval: Duration,
    /// Growth factor applied per further retry.
    pub retry_multiplier: f64,
    /// Upper bound for any single delay.
    pub retry_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            wait_interval: Duration::ZERO,
            retry_multiplier: 1.0,
            retry_max: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Longest delay the retry scheduler accepts (365 days). Larger backoffs
    /// are clamped to it.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    /// Backoff applied after `attempt` attempts have been made:
    /// `min(retry_max, wait_interval * retry_multiplier^(attempt - 1))`.
    ///
    /// Saturates to `retry_max` when the product is not representable. The
    /// result never exceeds [`RetryConfig::MAX_BACKOFF`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let cap = self.retry_max.min(Self::MAX_BACKOFF);
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.wait_interval.as_secs_f64() * self.retry_multiplier.powi(exp);
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(cap)
    }

    /// Returns `true` if a payload that has made `attempt` attempts may be
    /// retried.
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// One submitted unit of work.
pub struct Payload {
    id: u64,
    endpoint: String,
    data: Data,
    metadata: Data,
    callback: Option<Callback>,
    retry: RetryConfig,
    attempt: u32,
    state: PayloadState,
    response: Option<Value>,
    error: Option<RemoteError>,
}

impl Payload {
    pub(crate) fn new(
        id: u64,
        endpoint: String,
        data: Data,
        metadata: Data,
        callback: Option<Callback>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            id,
            endpoint,
            data,
            metadata,
            callback,
            retry,
            attempt: 0,
            state: PayloadState::New,
            response: None,
            error: None,
        }
    }

    /// Submission id assigned by the client's sequencer.
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request parameters after template merging.
    pub const fn data(&self) -> &Data {
        &self.data
    }

    pub const fn metadata(&self) -> &Data {
        &self.metadata
    }

    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Number of execution attempts made so far.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn state(&self) -> PayloadState {
        self.state
    }

    /// The successful response, set once the payload is `Succeeded`.
    pub const fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// The last failure, set once the payload is `Failed`.
    pub const fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    pub const fn succeeded(&self) -> bool {
        matches!(self.state, PayloadState::Succeeded)
    }

    pub const fn failed(&self) -> bool {
        matches!(self.state, PayloadState::Failed)
    }

    /// Consumes a terminal payload into its outcome.
    ///
    /// # Errors
    ///
    /// Returns the retained [`RemoteError`] of a failed payload. A payload that
    /// is not terminal yields a terminal error describing its state.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match (self.state, self.response, self.error) {
            (PayloadState::Succeeded, Some(response), _) => Ok(response),
            (PayloadState::Failed, _, Some(err)) => Err(err),
            (state, ..) => Err(RemoteError::terminal(format!(
                "payload {} is not terminal ({state:?})",
                self.id
            ))),
        }
    }

    pub(crate) fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    pub(crate) fn advance(&mut self, next: PayloadState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal payload transition {:?} -> {:?} (id {})",
            self.state,
            next,
            self.id
        );
        self.state = next;
    }

    /// Records the start of an execution attempt.
    pub(crate) fn begin_attempt(&mut self) {
        self.advance(PayloadState::InFlight);
        self.attempt += 1;
    }

    pub(crate) fn succeed(&mut self, response: Value) {
        self.advance(PayloadState::Succeeded);
        self.response = Some(response);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, err: RemoteError) {
        self.advance(PayloadState::Failed);
        self.error = Some(err);
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("data", &self.data)
            .field("metadata", &self.metadata)
            .field("callback", &self.callback.is_some())
            .field("retry", &self.retry)
            .field("attempt", &self.attempt)
            .field("state", &self.state)
            .field("response", &self.response)
            .field("error", &self.error)
            .finish()
    }
}
