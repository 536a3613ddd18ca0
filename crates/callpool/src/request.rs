use crate::payload::{Callback, Data, Payload, RetryConfig};
use core::{fmt, time::Duration};
use std::sync::Arc;

/// A call to submit through [`Client::request`](crate::Client::request).
///
/// Anything left unset falls back to the client's configuration. `data` and
/// `metadata` are merged over the client templates, with the request's own
/// entries winning on key collisions.
///
/// ```
/// use callpool::Request;
/// use serde_json::json;
///
/// let request = Request::from_value(json!({"prompt": "This is test 1"}))
///     .endpoint("completions")
///     .meta("id", 1)
///     .max_retries(3);
/// ```
#[derive(Clone, Default)]
pub struct Request {
    pub(crate) data: Data,
    pub(crate) endpoint: Option<String>,
    pub(crate) metadata: Data,
    pub(crate) callback: Option<Callback>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) wait_interval: Option<Duration>,
    pub(crate) retry_multiplier: Option<f64>,
    pub(crate) retry_max: Option<Duration>,
}

impl Request {
    pub fn new(data: Data) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Builds a request from a JSON object. Non-object values yield an empty
    /// parameter map.
    pub fn from_value(data: serde_json::Value) -> Self {
        match data {
            serde_json::Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Data) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Registers a completion callback. See [`Callback`] for the threading
    /// contract.
    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn wait_interval(mut self, wait_interval: Duration) -> Self {
        self.wait_interval = Some(wait_interval);
        self
    }

    #[must_use]
    pub fn retry_multiplier(mut self, retry_multiplier: f64) -> Self {
        self.retry_multiplier = Some(retry_multiplier);
        self
    }

    #[must_use]
    pub fn retry_max(mut self, retry_max: Duration) -> Self {
        self.retry_max = Some(retry_max);
        self
    }

    /// Applies the per-request overrides on top of `defaults`.
    pub(crate) fn retry_config(&self, defaults: &RetryConfig) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            wait_interval: self.wait_interval.unwrap_or(defaults.wait_interval),
            retry_multiplier: self.retry_multiplier.unwrap_or(defaults.retry_multiplier),
            retry_max: self.retry_max.unwrap_or(defaults.retry_max),
        }
    }
}

impl From<Data> for Request {
    fn from(data: Data) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("data", &self.data)
            .field("endpoint", &self.endpoint)
            .field("metadata", &self.metadata)
            .field("callback", &self.callback.is_some())
            .field("max_retries", &self.max_retries)
            .field("wait_interval", &self.wait_interval)
            .field("retry_multiplier", &self.retry_multiplier)
            .field("retry_max", &self.retry_max)
            .finish()
    }
}

/// Overlays `overrides` onto a copy of `template`.
pub(crate) fn merge(template: &Data, overrides: Data) -> Data {
    let mut merged = template.clone();
    merged.extend(overrides);
    merged
}
