//! Cron enqueuers for the Cloudnet processing queue.
//!
//! Two periodic jobs that never touch the scientific stack: one scans for
//! freezable files and enqueues `freeze` tasks, one enqueues a `qc` task for
//! every file measured yesterday. Fatal errors are reported to Slack and the
//! process exits non-zero so the cron scheduler notices.

mod freeze;
mod qc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cloudnet_api::alert::{send_slack_alert, AlertContext, AlertSource};
use cloudnet_api::MetadataClient;
use cloudnet_common::Config;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cronjobs")]
#[command(about = "Cloudnet queue enqueuers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue freeze tasks for files past their freeze age
    Freeze,
    /// Enqueue qc tasks for yesterday's files
    YesterdayQc,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;
    let md_api = MetadataClient::new(&config, http.clone());

    let (result, source) = match args.command {
        Command::Freeze => (
            freeze::run(&config, &md_api).await,
            AlertSource::FreezeCronjob,
        ),
        Command::YesterdayQc => (qc::run(&config, &md_api).await, AlertSource::QcCronjob),
    };

    if let Err(err) = result {
        error!(error = %err, "Fatal error in cronjob");
        send_slack_alert(
            &config,
            &http,
            source,
            &err.to_string(),
            None,
            &AlertContext::default(),
        )
        .await;
        std::process::exit(1);
    }
    Ok(())
}
