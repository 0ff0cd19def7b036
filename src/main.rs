// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use purchase_mirror::cli::Cli;
use purchase_mirror::logging::init_logger;
use purchase_mirror::platforms::expand;
use purchase_mirror::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli).await {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(summary) => {
            for failed in &summary.failed {
                error!(path = %failed.path.display(), "{}", failed.reason);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let platforms = expand(&cli.platforms);
    let config = RunConfig::load(&cli.config, &cli.overrides(), platforms)?;
    info!(
        folder = %config.download_folder.display(),
        parallel = config.download_limit,
        "starting"
    );

    let catalog = HumbleCatalog::new(
        &config.session_cookie,
        config.download_limit,
        config.special_collection,
    )?;
    let transport = HttpTransport::new(CONNECT_TIMEOUT).context("building http client")?;

    tokio::fs::create_dir_all(&config.download_folder)
        .await
        .with_context(|| format!("creating {}", config.download_folder.display()))?;
    let inventory = Inventory::open(&config.inventory_path).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping downloads");
            on_signal.cancel();
        }
    });

    let manager = RunManager::new(config, Arc::new(transport), Some(inventory), cancel);
    let summary = manager.mirror(&catalog).await?;
    println!(
        "{} downloaded ({}), {} already present, {} failed, {} orphaned",
        summary.downloaded,
        purchase_mirror::models::human_size(summary.bytes_downloaded),
        summary.already_present,
        summary.failed.len(),
        summary.orphaned.len()
    );
    Ok(summary)
}
