// src/manager.rs

use crate::catalog::{CatalogError, CatalogFetcher};
use crate::config::RunConfig;
use crate::downloader::{Completion, DownloadWorker, Transport};
use crate::index::{catalog_keys, FileIndex};
use crate::integrity::IntegrityVerifier;
use crate::inventory::{Inventory, InventoryError, PlacedFile};
use crate::models::{human_size, DownloadTask, PurchaseRecord};
use crate::paths::{PathLimits, PathResolver};
use crate::scheduler::DownloadScheduler;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file that could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub downloaded: usize,
    pub already_present: usize,
    pub bytes_downloaded: u64,
    pub failed: Vec<FailedFile>,
    pub orphaned: Vec<PathBuf>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the whole pipeline: index, select, resolve, schedule, record.
pub struct RunManager {
    config: RunConfig,
    transport: Arc<dyn Transport>,
    inventory: Option<Inventory>,
    limits: PathLimits,
    cancel: CancellationToken,
}

impl RunManager {
    pub fn new(
        config: RunConfig,
        transport: Arc<dyn Transport>,
        inventory: Option<Inventory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            inventory,
            limits: PathLimits::native(),
            cancel,
        }
    }

    pub fn with_path_limits(mut self, limits: PathLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Fetches the catalog and mirrors it. Authentication failures abort before
    /// anything is scheduled.
    pub async fn mirror(&self, fetcher: &dyn CatalogFetcher) -> Result<RunSummary, ManagerError> {
        let records = fetcher.fetch_purchases().await?;
        self.run(&records).await
    }

    pub async fn run(&self, records: &[PurchaseRecord]) -> Result<RunSummary, ManagerError> {
        let mut summary = RunSummary::default();
        let root = std::path::absolute(&self.config.download_folder)?;
        let root = &root;
        tokio::fs::create_dir_all(root).await?;

        let verifier = IntegrityVerifier::new(self.config.tolerance);
        let files = FileIndex::new(self.config.purchase_limit, self.config.special_collection)
            .build(records);

        if let Some(inventory) = &self.inventory {
            summary.orphaned = inventory
                .relocate_orphans(root, &catalog_keys(records), &verifier)
                .await?;
        }

        let resolver = PathResolver::new(root.clone(), self.limits);
        let mut tasks = Vec::new();
        for file in files
            .into_iter()
            .filter(|f| self.config.platforms.contains(&f.platform))
        {
            match resolver.resolve(&file) {
                Ok(destination) => tasks.push(DownloadTask::new(file, destination)),
                Err(e) => {
                    error!(file = %file.file_name, "{e}");
                    summary.failed.push(FailedFile {
                        path: root.join(file.platform.as_str()).join(&file.file_name),
                        reason: e.to_string(),
                    });
                }
            }
        }
        let total: u64 = tasks.iter().map(|t| t.size_bytes()).sum();
        info!(
            files = tasks.len(),
            size = %human_size(total),
            "checking files"
        );

        let worker = DownloadWorker::new(
            self.transport.clone(),
            verifier,
            self.config.retry,
            self.cancel.clone(),
        );
        let scheduler = DownloadScheduler::new(worker, self.config.download_limit, self.config.order);
        let mut completions = scheduler.schedule(tasks);

        let mut placed = Vec::new();
        while let Some(outcome) = completions.next().await {
            let task = outcome.task;
            match outcome.result {
                Ok(completion) => {
                    match completion {
                        Completion::AlreadyPresent => summary.already_present += 1,
                        Completion::Downloaded { bytes } => {
                            summary.downloaded += 1;
                            summary.bytes_downloaded += bytes;
                        }
                    }
                    placed.push(PlacedFile {
                        identity_key: task.file.identity_key.clone(),
                        relative_path: task
                            .destination
                            .strip_prefix(root)
                            .map(|p| p.to_path_buf())
                            .unwrap_or_else(|_| task.destination.clone()),
                        size_bytes: task.file.size_bytes,
                        checksum: task.file.checksum.clone(),
                        placed_at: Local::now().naive_local(),
                    });
                }
                Err(e) => {
                    warn!(path = %task.destination.display(), attempts = task.attempt_count, "failed: {e}");
                    summary.failed.push(FailedFile {
                        path: task.destination,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(inventory) = &self.inventory {
            inventory.record(&placed).await?;
        }

        info!(
            downloaded = summary.downloaded,
            size = %human_size(summary.bytes_downloaded),
            already_present = summary.already_present,
            failed = summary.failed.len(),
            orphaned = summary.orphaned.len(),
            "run finished"
        );
        Ok(summary)
    }
}
