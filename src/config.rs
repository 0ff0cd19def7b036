// src/config.rs

use crate::downloader::RetryPolicy;
use crate::integrity::ToleranceConfig;
use crate::models::Platform;
use crate::scheduler::{DownloadOrder, DEFAULT_CONCURRENCY};
use config::{Config, Environment, File as ConfigFile, FileFormat};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "PURCHASE_MIRROR";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const INVENTORY_FILE: &str = ".inventory.db";

pub const CONFIG_TEMPLATE: &str = r#"# Value of the `_simpleauth_sess` cookie of a logged-in browser session.
session_cookie: ""
# Files downloaded in parallel. 0 picks the default (6).
download_limit: 6
# Only look for new files in the newest N purchases. 0 scans everything.
purchase_limit: 0
smallest_first: false
# Keep local files whose size or md5 differs from the catalog.
keep_wrong_size: false
keep_wrong_md5sum: false
download_folder: "."
# Legacy promotional catalog. The vendor has retired it.
enable_special_collection: false
retries: 3
retry_delay_secs: 2
# A transfer that receives nothing for this long is retried.
stall_timeout_secs: 60
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found, a template was written to {0}; fill in session_cookie and run again")]
    Created(PathBuf),
    #[error("could not write config template: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("no platform selected")]
    NoPlatforms,
}

/// Settings as they appear in the file and environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub session_cookie: String,
    pub download_limit: i64,
    pub purchase_limit: i64,
    pub smallest_first: bool,
    pub keep_wrong_size: bool,
    pub keep_wrong_md5sum: bool,
    pub download_folder: PathBuf,
    #[serde(alias = "trove")]
    pub enable_special_collection: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub stall_timeout_secs: u64,
    pub inventory_path: Option<PathBuf>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            session_cookie: String::new(),
            download_limit: DEFAULT_CONCURRENCY as i64,
            purchase_limit: 0,
            smallest_first: false,
            keep_wrong_size: false,
            keep_wrong_md5sum: false,
            download_folder: PathBuf::from("."),
            enable_special_collection: false,
            retries: 3,
            retry_delay_secs: 2,
            stall_timeout_secs: 60,
            inventory_path: None,
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub download_limit: Option<i64>,
    pub purchase_limit: Option<i64>,
    pub smallest_first: bool,
    pub keep_wrong_size: bool,
    pub keep_wrong_md5sum: bool,
}

/// Immutable configuration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub session_cookie: String,
    pub download_limit: usize,
    pub purchase_limit: usize,
    pub order: DownloadOrder,
    pub tolerance: ToleranceConfig,
    pub platforms: BTreeSet<Platform>,
    pub special_collection: bool,
    pub download_folder: PathBuf,
    pub inventory_path: PathBuf,
    pub retry: RetryPolicy,
}

impl RunConfig {
    /// Reads `path`, applies `PURCHASE_MIRROR_*` variables, then `overrides`.
    /// A missing file is replaced by a template and reported as an error.
    pub fn load(
        path: &Path,
        overrides: &Overrides,
        platforms: BTreeSet<Platform>,
    ) -> Result<Self, ConfigError> {
        if !path.exists() {
            std::fs::write(path, CONFIG_TEMPLATE)?;
            return Err(ConfigError::Created(path.to_path_buf()));
        }

        let file: FileConfig = Config::builder()
            .add_source(ConfigFile::from(path).format(FileFormat::Yaml))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .set_override_option("download_limit", overrides.download_limit)?
            .set_override_option("purchase_limit", overrides.purchase_limit)?
            .set_override_option("smallest_first", overrides.smallest_first.then_some(true))?
            .set_override_option("keep_wrong_size", overrides.keep_wrong_size.then_some(true))?
            .set_override_option("keep_wrong_md5sum", overrides.keep_wrong_md5sum.then_some(true))?
            .build()?
            .try_deserialize()?;

        Self::from_file_config(file, platforms)
    }

    pub fn from_file_config(
        file: FileConfig,
        platforms: BTreeSet<Platform>,
    ) -> Result<Self, ConfigError> {
        if platforms.is_empty() {
            return Err(ConfigError::NoPlatforms);
        }
        let download_limit = match file.download_limit {
            n if n < 0 => {
                return Err(ConfigError::Invalid {
                    key: "download_limit",
                    reason: format!("{n} is negative"),
                })
            }
            0 => DEFAULT_CONCURRENCY,
            n => n as usize,
        };
        if file.stall_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "stall_timeout_secs",
                reason: "must be at least one second".into(),
            });
        }
        if file.purchase_limit < 0 {
            return Err(ConfigError::Invalid {
                key: "purchase_limit",
                reason: format!("{} is negative", file.purchase_limit),
            });
        }
        let inventory_path = file
            .inventory_path
            .unwrap_or_else(|| file.download_folder.join(INVENTORY_FILE));

        Ok(Self {
            session_cookie: file.session_cookie,
            download_limit,
            purchase_limit: file.purchase_limit as usize,
            order: if file.smallest_first {
                DownloadOrder::SmallestFirst
            } else {
                DownloadOrder::LargestFirst
            },
            tolerance: ToleranceConfig {
                size: file.keep_wrong_size,
                checksum: file.keep_wrong_md5sum,
            },
            platforms,
            special_collection: file.enable_special_collection,
            download_folder: file.download_folder,
            inventory_path,
            retry: RetryPolicy {
                retries: file.retries,
                delay: Duration::from_secs(file.retry_delay_secs),
                stall_timeout: Duration::from_secs(file.stall_timeout_secs),
            },
        })
    }
}
