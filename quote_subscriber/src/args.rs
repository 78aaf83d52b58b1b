//! Command-line arguments for the quote subscriber.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use std::path::PathBuf;

use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Publisher feed address as logged at its startup, e.g. `ipc:///tmp/quote_feed_ipc`.
    /// Defaults to the platform default address.
    #[clap(long)]
    pub address: Option<String>,

    /// Path to the token mapping file (`instrument,exchange|token` per line).
    #[clap(long)]
    pub mappings: PathBuf,

    /// Interval between bar polls, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub poll_ms: u64,

    /// Seconds without a quote after which the feed is reported stale.
    #[clap(long, default_value_t = 5)]
    pub heartbeat: u64,

    /// Buffer order updates and log them.
    #[clap(long, default_value_t = false)]
    pub orders: bool,
}
