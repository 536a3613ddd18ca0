#![doc = include_str!("../README.md")]

mod config;
mod remote;
mod report;
mod telemetry;

use anyhow::{Context, bail};
use callpool::{Client, Completions, ProducerHandle, Request};
use clap::Parser;
use config::{CliArgs, MockConfig};
use remote::MockRemote;
use report::{Counts, Tally};
use serde_json::json;
use std::sync::Arc;
use telemetry::init_telemetry;
use tokio::signal;
use tokio_stream::StreamExt;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = MockConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let remote = MockRemote::new(config.failure_rate, config.max_latency);
    let (client, completions) = Client::new(config.client.clone(), remote)?;

    let tally = Arc::new(Tally::default());
    let producer = spawn_producer(&client, &config, &tally);

    let drained = tokio::select! {
        () = consume(completions, &config, &tally) => true,
        () = shutdown_signal() => false,
    };

    // Joins the workers; also ends the stream if it was interrupted.
    client.shutdown().await.context("worker pool failed")?;
    let produced = producer.await;
    providers.shutdown();

    let counts = tally.snapshot();
    tracing::info!(
        "Done: {} released ({} succeeded, {} failed) of {} submitted",
        counts.total(),
        counts.succeeded,
        counts.failed,
        client.submitted()
    );

    if !drained {
        tracing::warn!("Interrupted before the workload drained");
        return Ok(());
    }
    produced.context("producer failed")?;
    verify(&counts, &config)
}

fn log_startup_info(config: &MockConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting mock workload with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting mock workload: {} payloads, {} workers, {:?} delivery",
            config.count,
            config.client.concurrency,
            config.client.order
        );
    }
}

fn spawn_producer(client: &Client, config: &MockConfig, tally: &Arc<Tally>) -> ProducerHandle {
    let count = config.count;
    let tally = config.callbacks.then(|| Arc::clone(tally));

    client.run_request_function(move |client| async move {
        for id in 1..=count {
            let mut request =
                Request::from_value(json!({ "prompt": format!("This is test {id}") }))
                    .meta("id", id);
            if let Some(tally) = &tally {
                let tally = Arc::clone(tally);
                request = request.callback(move |payload| tally.record(payload));
            }
            client.request(request).await?;
            telemetry::increment_requests();
        }
        tracing::debug!("Producer submitted {count} payloads");
        Ok::<_, callpool::Error>(())
    })
}

/// Reads the completion stream to its end.
async fn consume(mut completions: Completions, config: &MockConfig, tally: &Tally) {
    if config.callbacks {
        // Callbacks already recorded every payload.
        let drained = completions.pull_all().await;
        tracing::debug!("Drained {drained} payloads");
        return;
    }

    while let Some(payload) = completions.next().await {
        tally.record(&payload);
    }
}

/// Checks nothing was lost or duplicated and, for ordered runs, that ids were
/// released ascending.
fn verify(counts: &Counts, config: &MockConfig) -> anyhow::Result<()> {
    if counts.total() != config.count {
        bail!(
            "released {} payloads, expected {}",
            counts.total(),
            config.count
        );
    }

    if config.ordered() && !counts.is_ascending() {
        bail!("ordered run released ids out of order");
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
