use crate::{error::RemoteError, payload::Data};
use core::future::Future;
use serde_json::Value;

/// The remote operation executed by the worker pool.
///
/// Implementations own everything about the call itself (request building,
/// authentication, transport, timeouts). The pool only decides *when* and
/// *how often* to call it.
///
/// A single instance is shared by every worker, so `call` runs concurrently
/// with itself.
///
/// Any `Fn(String, Data) -> impl Future<Output = Result<Value, RemoteError>>`
/// closure implements this trait.
pub trait RemoteCall: Send + Sync + 'static {
    /// Executes one attempt against `endpoint`.
    ///
    /// # Errors
    ///
    /// Return [`RemoteError::Transient`] for failures worth retrying and
    /// [`RemoteError::Terminal`] for failures that must fail the payload
    /// immediately.
    fn call(
        &self,
        endpoint: &str,
        data: &Data,
    ) -> impl Future<Output = Result<Value, RemoteError>> + Send;
}

impl<F, Fut> RemoteCall for F
where
    F: Fn(String, Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send,
{
    fn call(
        &self,
        endpoint: &str,
        data: &Data,
    ) -> impl Future<Output = Result<Value, RemoteError>> + Send {
        self(endpoint.to_owned(), data.clone())
    }
}
