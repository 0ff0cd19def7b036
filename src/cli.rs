// src/cli.rs

use crate::config::{Overrides, DEFAULT_CONFIG_PATH};
use crate::platforms::PlatformSelector;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Download purchased files, organised by platform and purchase.
#[derive(Debug, Parser)]
#[command(name = "purchase-mirror", version, about)]
pub struct Cli {
    /// Platforms to download: android, audio, ebook, linux, mac, windows, video, other, nogames, all
    #[arg(required = true, num_args = 1.., value_name = "PLATFORM")]
    pub platforms: Vec<PlatformSelector>,

    /// Download X files in parallel
    #[arg(short = 'l', long = "download_limit", value_name = "X")]
    pub download_limit: Option<i64>,

    /// Look for new files only in the Y newest purchases, 0 for all
    #[arg(short = 'n', long = "purchase_limit", value_name = "Y")]
    pub purchase_limit: Option<i64>,

    /// Download smallest files first
    #[arg(short = 's', long = "smallest_first")]
    pub smallest_first: bool,

    /// Keep local files whose size differs from the catalog
    #[arg(short = 'w', long = "keep_wrong_size")]
    pub keep_wrong_size: bool,

    /// Keep local files whose md5sum differs from the catalog
    #[arg(short = 'm', long = "keep_wrong_md5sum")]
    pub keep_wrong_md5sum: bool,

    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// More log output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            download_limit: self.download_limit,
            purchase_limit: self.purchase_limit,
            smallest_first: self.smallest_first,
            keep_wrong_size: self.keep_wrong_size,
            keep_wrong_md5sum: self.keep_wrong_md5sum,
        }
    }
}
