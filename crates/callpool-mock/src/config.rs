use anyhow::bail;
use callpool::{ClientConfig, DeliveryOrder, RetryConfig};
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `callpool-mock` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a `.env`
/// file is loaded first). The defaults drive a small, visibly flaky workload.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "callpool-mock",
    version,
    about = "Drive a callpool client against a randomized mock remote"
)]
pub struct CliArgs {
    /// Number of payloads the producer submits.
    ///
    /// Environment variable: `MOCK_COUNT`
    #[arg(long, env = "MOCK_COUNT", default_value_t = 100)]
    pub count: u64,

    /// Number of workers executing mock calls in parallel.
    ///
    /// Environment variable: `MOCK_CONCURRENCY`
    #[arg(long, env = "MOCK_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Capacity of the ingress queue. The producer waits while it is full.
    ///
    /// Environment variable: `MOCK_QUEUE_CAPACITY`
    #[arg(long, env = "MOCK_QUEUE_CAPACITY", default_value_t = 100)]
    pub queue_capacity: usize,

    /// Retries allowed per payload after its first attempt.
    ///
    /// Environment variable: `MOCK_MAX_RETRIES`
    #[arg(long, env = "MOCK_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Base backoff before the first retry, in milliseconds.
    ///
    /// Environment variable: `MOCK_WAIT_INTERVAL_MS`
    #[arg(long, env = "MOCK_WAIT_INTERVAL_MS", default_value_t = 0)]
    pub wait_interval_ms: u64,

    /// Factor applied to the backoff for every further retry.
    ///
    /// Environment variable: `MOCK_RETRY_MULTIPLIER`
    #[arg(long, env = "MOCK_RETRY_MULTIPLIER", default_value_t = 2.0)]
    pub retry_multiplier: f64,

    /// Upper bound on any single backoff, in milliseconds.
    ///
    /// Environment variable: `MOCK_RETRY_MAX_MS`
    #[arg(long, env = "MOCK_RETRY_MAX_MS", default_value_t = 60_000)]
    pub retry_max_ms: u64,

    /// Probability in `[0, 1]` that a mock call fails transiently.
    ///
    /// Environment variable: `MOCK_FAILURE_RATE`
    #[arg(long, env = "MOCK_FAILURE_RATE", default_value_t = 0.3)]
    pub failure_rate: f64,

    /// Each mock call sleeps a random duration up to this many milliseconds.
    ///
    /// Environment variable: `MOCK_MAX_LATENCY_MS`
    #[arg(long, env = "MOCK_MAX_LATENCY_MS", default_value_t = 1000)]
    pub max_latency_ms: u64,

    /// Release payloads in submission order and verify it.
    ///
    /// Environment variable: `MOCK_ORDERED`
    #[arg(long, env = "MOCK_ORDERED", default_value_t = false)]
    pub ordered: bool,

    /// Report results from per-payload callbacks and drain with `pull_all`.
    ///
    /// Environment variable: `MOCK_CALLBACKS`
    #[arg(long, env = "MOCK_CALLBACKS", default_value_t = false)]
    pub callbacks: bool,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub count: u64,
    pub client: ClientConfig,
    pub failure_rate: f64,
    pub max_latency: Duration,
    pub callbacks: bool,
}

impl MockConfig {
    pub fn ordered(&self) -> bool {
        self.client.order == DeliveryOrder::Ordered
    }
}

impl TryFrom<CliArgs> for MockConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.count == 0 {
            bail!("MOCK_COUNT must be greater than 0");
        }

        if !(0.0..=1.0).contains(&args.failure_rate) {
            bail!(
                "MOCK_FAILURE_RATE must be within [0, 1], got {}",
                args.failure_rate
            );
        }

        let client = ClientConfig {
            concurrency: args.concurrency,
            queue_capacity: args.queue_capacity,
            retry: RetryConfig {
                max_retries: args.max_retries,
                wait_interval: Duration::from_millis(args.wait_interval_ms),
                retry_multiplier: args.retry_multiplier,
                retry_max: Duration::from_millis(args.retry_max_ms),
            },
            order: if args.ordered {
                DeliveryOrder::Ordered
            } else {
                DeliveryOrder::Unordered
            },
            ..ClientConfig::default()
        }
        .with_endpoint("mock");
        client.validate()?;

        Ok(Self {
            count: args.count,
            client,
            failure_rate: args.failure_rate,
            max_latency: Duration::from_millis(args.max_latency_ms),
            callbacks: args.callbacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<MockConfig> {
        let argv = core::iter::once("callpool-mock").chain(args.iter().copied());
        MockConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_build_a_valid_config() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.count, 100);
        assert_eq!(config.client.concurrency, 10);
        assert_eq!(config.client.retry.max_retries, 3);
        assert_eq!(config.client.retry.retry_multiplier, 2.0);
        assert_eq!(config.client.endpoint.as_deref(), Some("mock"));
        assert!(!config.ordered());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&["--count", "5", "--ordered", "--max-latency-ms", "10"]).unwrap();
        assert_eq!(config.count, 5);
        assert!(config.ordered());
        assert_eq!(config.max_latency, Duration::from_millis(10));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["--failure-rate", "1.5"]).is_err());
        assert!(parse(&["--concurrency", "0"]).is_err());
        assert!(parse(&["--count", "0"]).is_err());
    }
}
