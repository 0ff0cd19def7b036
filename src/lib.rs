pub mod catalog;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod index;
pub mod integrity;
pub mod inventory;
pub mod logging;
pub mod manager;
pub mod models;
pub mod paths;
pub mod platforms;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::catalog::{CatalogError, CatalogFetcher, HumbleCatalog};
    pub use crate::config::{ConfigError, RunConfig};
    pub use crate::downloader::{
        Body, Completion, HttpTransport, RetryPolicy, TransferError, Transport, TransportError,
    };
    pub use crate::index::FileIndex;
    pub use crate::integrity::{IntegrityVerifier, ToleranceConfig, VerifyResult};
    pub use crate::inventory::Inventory;
    pub use crate::manager::{FailedFile, ManagerError, RunManager, RunSummary};
    pub use crate::models::{
        CanonicalFile, Checksum, DownloadTask, FileEntry, Platform, PurchaseRecord,
    };
    pub use crate::paths::{PathLimits, PathResolver};
    pub use crate::scheduler::{DownloadOrder, DownloadScheduler};
}
