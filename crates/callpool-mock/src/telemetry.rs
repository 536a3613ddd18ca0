//! # Telemetry
//!
//! Console logging is always on: a `tracing_subscriber::fmt` layer filtered by
//! `RUST_LOG` (default `info`). It prints the events the `callpool` workers,
//! retry scheduler and producers emit alongside the driver's own.
//!
//! ## Metrics
//!
//! With the `metrics` feature, OpenTelemetry counters describing the workload
//! are exported to stdout every few seconds:
//!
//! - `requests`: payloads submitted by the producer
//! - `attempts`: mock calls executed, retries included
//! - `retries`: transient failures returned by the mock
//! - `failures`: payloads released in the failed state
//! - `inflight`: mock calls currently executing
//!
//! ```bash
//! RUST_LOG=callpool=debug cargo run -p callpool-mock --features metrics -- --ordered
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Meter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters. Errors are printed, not returned:
    /// there is nothing left to report them through.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        );

    #[cfg(feature = "metrics")]
    let registry = {
        let scope = InstrumentationScope::builder("callpool-mock")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("callpool-mock")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let exporter = opentelemetry_stdout::MetricExporter::default();
    let reader = sdkmetrics::PeriodicReader::builder(exporter)
        .with_interval(std::time::Duration::from_secs(5))
        .build();

    sdkmetrics::SdkMeterProvider::builder()
        .with_resource(resource())
        .with_reader(reader)
        .build()
}

#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ATTEMPTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RETRIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Payloads submitted")
            .build(),
    );

    let _ = ATTEMPTS.set(
        meter
            .u64_counter("attempts")
            .with_description("Mock calls executed, retries included")
            .build(),
    );

    let _ = RETRIES.set(
        meter
            .u64_counter("retries")
            .with_description("Transient failures returned by the mock")
            .build(),
    );

    let _ = FAILURES.set(
        meter
            .u64_counter("failures")
            .with_description("Payloads released as failed")
            .build(),
    );

    let _ = INFLIGHT.set(
        meter
            .i64_up_down_counter("inflight")
            .with_description("Mock calls currently executing")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests() {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_attempts() {
    if let Some(counter) = ATTEMPTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_attempts() {}

#[cfg(feature = "metrics")]
pub fn increment_retries() {
    if let Some(counter) = RETRIES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_retries() {}

#[cfg(feature = "metrics")]
pub fn increment_failures() {
    if let Some(counter) = FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_failures() {}

#[cfg(feature = "metrics")]
pub fn increment_inflight() {
    if let Some(counter) = INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_inflight() {
    if let Some(counter) = INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_inflight() {}
