//! CLI entry point for the log exporter.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use exporter_core::export::{ExportEngine, ExportObserver, RunReport, TracingObserver};
use exporter_core::report::{JsonReportRenderer, ReportRenderer};
use exporter_core::source::CommandLogSource;
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod progress;

use cli::Args;
use config::Settings;
use progress::ProgressObserver;

/// Process outcome; fatal errors exit with 1 through `anyhow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// Every log is on disk with real content.
    Success,
    /// Some logs still failed after the retry pass.
    Partial,
    /// The logs could not be listed; nothing was exported.
    ListingFailed,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ListingFailed => 1,
            Self::Partial => 2,
        }
    }
}

fn determine_exit_outcome(report: &RunReport) -> ProcessExit {
    if report.listing_error.is_some() {
        ProcessExit::ListingFailed
    } else if report.is_clean() {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}

fn init_tracing(args: &Args) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    let file_config = config::load_file_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, file_config.as_ref());
    debug!(?settings, "settings resolved");

    let source = Arc::new(CommandLogSource::new(
        settings.cli_binary.clone(),
        settings.target_org.clone(),
        settings.limits,
    ));

    let progress = progress::should_use_spinner(io::stderr().is_terminal(), args.quiet, args.no_progress)
        .then(|| Arc::new(ProgressObserver::new()));
    let observer: Arc<dyn ExportObserver> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn ExportObserver>,
        None => Arc::new(TracingObserver),
    };

    info!(
        org = settings.target_org.as_deref().unwrap_or("default"),
        export_dir = %settings.export_dir.display(),
        "log export starting"
    );

    let engine = ExportEngine::new(source, settings.export_config())
        .context("Invalid export settings")?
        .with_observer(observer);
    let report = engine.run().await;

    if let Some(progress) = &progress {
        progress.finish();
    }
    let report = report.context("Export failed")?;

    let summary_path = JsonReportRenderer::new(&settings.export_dir)
        .render(&report)
        .context("Failed to write export summary")?;

    if let Some(listing_error) = &report.listing_error {
        error!(
            error = %listing_error,
            summary = %summary_path.display(),
            "export aborted: could not list logs"
        );
        return Ok(ExitCode::from(determine_exit_outcome(&report).code()));
    }

    let stats = &report.stats;
    info!(
        total = stats.total,
        existing = stats.existing,
        downloaded = stats.downloaded,
        recovered = stats.recovered,
        failed = stats.failed,
        local_io_failures = stats.io_failures,
        summary = %summary_path.display(),
        "export complete"
    );

    if let Some(ledger_path) = &report.ledger_path {
        warn!(
            pending = report.pending_ids.len(),
            ledger = %ledger_path.display(),
            "some logs could not be retrieved; rerun to retry them"
        );
    }

    Ok(ExitCode::from(determine_exit_outcome(&report).code()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use exporter_core::export::RunStats;

    use super::*;

    fn report(stats: RunStats) -> RunReport {
        RunReport {
            org: "prod".to_string(),
            started_at: Utc::now(),
            stats,
            rows: Vec::new(),
            ledger_path: None,
            pending_ids: Vec::new(),
            listing_error: None,
        }
    }

    #[test]
    fn test_exit_outcome_success_when_no_failures() {
        let mut stats = RunStats::new(3);
        stats.downloaded = 2;
        stats.existing = 1;
        assert_eq!(determine_exit_outcome(&report(stats)), ProcessExit::Success);
        assert_eq!(ProcessExit::Success.code(), 0);
    }

    #[test]
    fn test_exit_outcome_success_when_nothing_listed() {
        assert_eq!(
            determine_exit_outcome(&report(RunStats::default())),
            ProcessExit::Success
        );
    }

    #[test]
    fn test_exit_outcome_partial_when_failures_remain() {
        let mut stats = RunStats::new(2);
        stats.downloaded = 1;
        stats.failed = 1;
        assert_eq!(determine_exit_outcome(&report(stats)), ProcessExit::Partial);
        assert_eq!(ProcessExit::Partial.code(), 2);
    }

    #[test]
    fn test_exit_outcome_listing_failure_is_not_success() {
        let failed = RunReport {
            listing_error: Some("NamedOrgNotFound".to_string()),
            ..report(RunStats::default())
        };
        assert_eq!(determine_exit_outcome(&failed), ProcessExit::ListingFailed);
        assert_eq!(ProcessExit::ListingFailed.code(), 1);
    }
}
