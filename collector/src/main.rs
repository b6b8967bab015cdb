mod config;
mod errors;
mod models;
mod services;
mod utils;

use crate::config::{init_logger, load_environment, Config};
use crate::services::{run_daily, run_monthly, run_validation, HttpTransport, YouTubeClient};
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "channel-collector")]
#[command(version)]
#[command(about = "Collect YouTube channel and video snapshots into CSV datasets")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data directory (overrides DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Curated channel list (overrides CHANNELS_FILE)
    #[arg(long, global = true, value_name = "FILE")]
    channels: Option<PathBuf>,

    /// Concurrent API batches / channels (overrides FETCH_CONCURRENCY)
    #[arg(long, global = true, value_name = "N")]
    concurrency: Option<usize>,

    /// Log level
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Validate channels, append today's snapshot and update the reference table
    Daily,
    /// Validate channels and write this month's video snapshot
    Monthly,
    /// Validate channels and refresh the validation cache only
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    load_environment();
    init_logger(LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(channels) = cli.channels {
        config.channels_file = Some(channels);
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency.max(1);
    }

    let paths = config.paths();
    info!(
        "Data directory: {}, channel list: {}",
        paths.data_dir.display(),
        paths.channels_file.display()
    );

    let transport = HttpTransport::new(
        &config.api_base,
        config.api_key.clone(),
        config.request_timeout,
    )?;
    let client = YouTubeClient::new(transport, config.retry.clone(), config.concurrency);
    let now = Utc::now();

    match cli.command {
        Command::Daily => {
            let summary = run_daily(&client, &paths, now).await?;
            println!(
                "{}: accepted: {}, appended: {}, already present: {}, errors: {} ({})",
                summary.date,
                summary.accepted,
                summary.appended,
                summary.already_present,
                summary.errors,
                summary.error_file.display()
            );
        }
        Command::Monthly => {
            let summary =
                run_monthly(&client, &paths, &config.selection, config.concurrency, now).await?;
            println!(
                "{}: {} rows for {} channels in {}, errors: {} ({})",
                summary.month,
                summary.rows,
                summary.channels,
                summary.output.display(),
                summary.errors,
                summary.error_file.display()
            );
        }
        Command::Validate => {
            let report = run_validation(&client, &paths, now).await?;
            println!(
                "accepted: {}, missing: {}, invalid: {}, unresolved: {}",
                report.accepted.len(),
                report.missing.len(),
                report.invalid.len(),
                report.unresolved.len()
            );
        }
    }
    Ok(())
}
