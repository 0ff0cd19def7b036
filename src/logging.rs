// src/logging.rs

use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a tracing filter, e.g. `purchase_mirror=debug`.
pub const LOG_ENV: &str = "PURCHASE_MIRROR_LOG";

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Installs the global subscriber. An explicit filter in [`LOG_ENV`] wins over `-v`.
pub fn init_logger(verbosity: u8) {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_filter(verbosity).to_string());
    let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter_layer)
        .init();
}
