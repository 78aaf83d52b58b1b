//! Command-line arguments for the quote publisher.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use std::path::PathBuf;

use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Feed address to bind, `ipc:///path` or `tcp://127.0.0.1:0`.
    /// Defaults to an IPC socket in the temp directory (loopback TCP off unix).
    #[clap(long)]
    pub address: Option<String>,

    /// Path to the token mapping file (`instrument,exchange|token` per line).
    #[clap(long)]
    pub mappings: PathBuf,

    /// Instruments to stream; all mapped instruments when omitted.
    #[clap(long, value_delimiter = ',')]
    pub instruments: Vec<String>,

    /// Interval between simulated ticks, in milliseconds.
    #[clap(long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Seconds to wait for the session to open and every instrument to quote.
    #[clap(long, default_value_t = 10)]
    pub timeout: u64,

    /// Append merged quotes to this JSON Lines file.
    #[clap(long)]
    pub sink: Option<PathBuf>,
}
