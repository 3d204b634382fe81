//! Cloudnet task worker.
//!
//! Long-running single-task consumer:
//! - pulls typed tasks off the data portal queue
//! - dispatches by (product kind, task type)
//! - reports completion, skips and failures back to the queue
//! - sends Slack alerts with the captured per-task log on failures
//! - self-terminates after a bounded number of tasks; the orchestrator
//!   restarts it

mod memory_log;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cloudnet_api::alert::{send_slack_alert, AlertContext, AlertSource};
use cloudnet_api::{DvasClient, MetadataClient, PidClient, StorageClient};
use cloudnet_common::Config;
use processing::{CommandScience, Processor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use memory_log::LogBuffer;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Cloudnet processing worker")]
struct Args {
    /// Maximum tasks before self-termination
    #[arg(long, env = "WORKER_MAX_TASKS", default_value = "100")]
    max_tasks: usize,

    /// Seconds to sleep when the queue is empty
    #[arg(long, default_value = "10")]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let log_buffer = LogBuffer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_buffer.clone()),
        )
        .init();

    let config = Config::from_env()?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let processor = Processor::new(
        MetadataClient::new(&config, http.clone()),
        StorageClient::new(&config, http.clone()),
        PidClient::new(&config, http.clone()),
        DvasClient::new(&config, http.clone()),
        Arc::new(CommandScience::new(config.science_command.clone())),
        config.clone(),
    );
    let mut worker = Worker::new(processor, config.clone(), http.clone(), log_buffer);

    // SIGINT/SIGTERM finish the current task, then stop.
    let stop = CancellationToken::new();
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("signal handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("Received termination signal");
        stop_signal.cancel();
    });

    info!("Waiting for a task...");
    let result = run(&mut worker, &stop, &args).await;
    match result {
        Ok(()) => {
            if worker.n_processed_tasks >= args.max_tasks {
                info!("Terminate after processing the maximum number of tasks");
            }
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Fatal error in worker");
            send_slack_alert(
                &config,
                &http,
                AlertSource::Worker,
                &err.to_string(),
                None,
                &AlertContext::default(),
            )
            .await;
            Err(err.into())
        }
    }
}

async fn run(
    worker: &mut Worker,
    stop: &CancellationToken,
    args: &Args,
) -> cloudnet_common::CloudnetResult<()> {
    while !stop.is_cancelled() && worker.n_processed_tasks < args.max_tasks {
        if !worker.process_task().await? {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(args.poll_interval)) => {}
            }
        }
    }
    Ok(())
}
