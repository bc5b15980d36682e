//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Bulk export of platform debug logs.
///
/// Lists every debug log in the target org, downloads them in concurrent
/// batches, retries failures, and writes a JSON summary next to the files.
/// Flags override values from the config file.
#[derive(Parser, Debug)]
#[command(name = "log-exporter")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Org alias or username to export from (CLI default org when omitted)
    #[arg(short = 'o', long)]
    pub org: Option<String>,

    /// Directory logs are exported under
    #[arg(short = 'd', long)]
    pub output_dir: Option<PathBuf>,

    /// Logs exported concurrently per batch (1-100) [default: 5]
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub batch_size: Option<u8>,

    /// Retrieval attempts per log, including the first (1-50) [default: 10]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=50))]
    pub max_attempts: Option<u32>,

    /// Backoff delay unit in milliseconds (0-60000) [default: 1000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub base_delay_ms: Option<u64>,

    /// Platform CLI executable [default: sf]
    #[arg(long)]
    pub cli_binary: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/log-exporter/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}
