use crate::{
    error::{Error, Result},
    payload::{Data, RetryConfig},
};
use core::time::Duration;

/// How completed payloads are handed to the consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeliveryOrder {
    /// In completion order, as soon as each payload finishes.
    #[default]
    Unordered,
    /// In submission order; fast completions wait for slower predecessors.
    Ordered,
}

/// Client-level configuration.
///
/// Every field has a default; override only what you need:
///
/// ```
/// use callpool::{ClientConfig, DeliveryOrder};
///
/// let config = ClientConfig {
///     concurrency: 4,
///     order: DeliveryOrder::Ordered,
///     ..ClientConfig::default()
/// }
/// .with_endpoint("completions");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Number of workers executing calls in parallel.
    pub concurrency: usize,
    /// Capacity of the ingress queue. Submissions wait while it is full.
    pub queue_capacity: usize,
    /// Default retry budget and backoff, overridable per request.
    pub retry: RetryConfig,
    /// Endpoint used by requests that do not name one.
    pub endpoint: Option<String>,
    /// Parameters merged under every request's data.
    pub data_template: Data,
    /// Entries merged under every request's metadata.
    pub metadata_template: Data,
    pub order: DeliveryOrder,
    /// How long [`Client::shutdown`](crate::Client::shutdown) waits for
    /// outstanding work before abandoning it.
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 100,
            retry: RetryConfig::default(),
            endpoint: None,
            data_template: Data::new(),
            metadata_template: Data::new(),
            order: DeliveryOrder::Unordered,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_data_template(mut self, template: Data) -> Self {
        self.data_template = template;
        self
    }

    #[must_use]
    pub fn with_metadata_template(mut self, template: Data) -> Self {
        self.metadata_template = template;
        self
    }

    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.order = DeliveryOrder::Ordered;
        self
    }

    /// Checks the configuration can drive a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if:
    /// - `concurrency` or `queue_capacity` is zero.
    /// - `retry.retry_multiplier` is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig {
                reason: "concurrency must be greater than 0".to_string(),
            });
        }

        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue_capacity must be greater than 0".to_string(),
            });
        }

        let multiplier = self.retry.retry_multiplier;
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(Error::InvalidConfig {
                reason: format!("retry_multiplier must be finite and >= 0, got {multiplier}"),
            });
        }

        Ok(())
    }
}
