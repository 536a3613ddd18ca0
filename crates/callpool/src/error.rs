//! Error types for the dispatch core.
//!
//! Two families of errors exist and they travel on different paths:
//!
//! - [`RemoteError`] is produced by the application's [`RemoteCall`] and is
//!   stored *as data* on the terminal [`Payload`]. It is never raised on a
//!   worker.
//! - [`Error`] is returned by the client API itself (submission, producer
//!   joins, shutdown).
//!
//! ## Error Cases
//! - `InvalidConfig`: The [`ClientConfig`] failed validation.
//! - `InvalidRequest`: A request could not be turned into a payload (e.g. no
//!   endpoint).
//! - `Closed`: A request arrived after end-of-stream was signaled.
//! - `IngressClosed`: A worker observed the ingress queue closed while work was
//!   still expected. This is an internal invariant violation.
//! - `Producer` / `ProducerPanicked`: Caller-supplied production logic failed.
//! - `ChannelError`: An internal channel could not be used.
//!
//! [`RemoteCall`]: crate::RemoteCall
//! [`Payload`]: crate::Payload
//! [`ClientConfig`]: crate::ClientConfig

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the client API.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The client configuration is not usable.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The request could not be submitted as given.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The client already signaled end-of-stream and accepts no more work.
    #[error("Client is closed")]
    Closed,

    /// The ingress queue closed underneath a worker while the pipeline was
    /// still running.
    #[error("Ingress queue closed while work was outstanding")]
    IngressClosed,

    /// The production logic returned an error.
    #[error("Producer failed: {0}")]
    Producer(String),

    /// The production logic panicked.
    #[error("Producer panicked")]
    ProducerPanicked,

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

/// Failure reported by a [`RemoteCall`](crate::RemoteCall).
///
/// The variant decides what the worker does next: a transient failure is
/// retried while the payload's budget allows it, a terminal failure fails the
/// payload immediately.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq, Hash)]
pub enum RemoteError {
    /// The call failed but may succeed if attempted again.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The call failed and must not be attempted again.
    #[error("terminal remote error: {0}")]
    Terminal(String),
}

impl RemoteError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Returns `true` if the worker may schedule another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The message carried by either variant.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Terminal(msg) => msg,
        }
    }
}
