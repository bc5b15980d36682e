//! Export engine: batched concurrent export with a sequential retry pass.
//!
//! This module provides the [`ExportEngine`] which lists every log from a
//! [`LogSource`], exports them in fixed-size batches whose tasks run
//! concurrently, records terminal failures in a [`FailureLedger`], and then
//! sweeps the ledger once more, one log at a time.
//!
//! # Overview
//!
//! At most `batch_size` retrievals are in flight at once. Batches run strictly
//! one after another, and a batch only ends once every task in it has settled
//! (a panicked task counts as a failure). Counters are returned in the
//! [`RunReport`], never printed; progress flows through the [`ExportObserver`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exporter_core::export::{ExportConfig, ExportEngine};
//! use exporter_core::source::{CommandLimits, CommandLogSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(CommandLogSource::new("sf", None, CommandLimits::default()));
//! let engine = ExportEngine::new(source, ExportConfig::new("./logs"))?;
//! let report = engine.run().await?;
//! println!("downloaded {}, failed {}", report.stats.downloaded, report.stats.failed);
//! # Ok(())
//! # }
//! ```

mod retry_pass;
mod task;

pub use task::TaskOutcome;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use retry_pass::FailedArtifact;

use super::backoff::BackoffDownloader;
use super::ledger::{FailureLedger, ledger_file_name};
use super::observer::{ExportEvent, ExportObserver, OutcomeKind, TracingObserver};
use super::rate_limiter::{DEFAULT_METADATA_INTERVAL, RateLimiter};
use super::retry::RetryPolicy;
use super::stats::RunStats;
use super::summary::SummaryAggregator;
use crate::artifact::{ArtifactDescriptor, SummaryRow};
use crate::source::LogSource;

/// Minimum allowed batch size.
const MIN_BATCH_SIZE: usize = 1;

/// Maximum allowed batch size.
const MAX_BATCH_SIZE: usize = 100;

/// Default number of logs exported concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Size above which a log is reported as large before download (10 MB).
pub const DEFAULT_LARGE_LOG_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Prefix of the per-run scratch directory inside the export root.
const SCRATCH_PREFIX: &str = ".log-exporter-";

/// Error type for export engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid batch size provided.
    #[error("invalid batch size {value}: must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}")]
    InvalidBatchSize {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The export root or scratch directory could not be prepared.
    #[error("cannot prepare export directory {path}: {source}")]
    ExportRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    fn export_root(path: &Path, source: std::io::Error) -> Self {
        Self::ExportRoot {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Settings for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory logs are exported under.
    pub export_root: PathBuf,
    /// Logs exported concurrently per batch.
    pub batch_size: usize,
    /// Size above which a [`ExportEvent::LargeArtifact`] is emitted.
    pub large_log_threshold_bytes: u64,
    /// Minimum interval between metadata calls against one org.
    pub metadata_interval: Duration,
    /// Retrieval retry behaviour.
    pub retry_policy: RetryPolicy,
}

impl ExportConfig {
    /// Default settings exporting under `export_root`.
    #[must_use]
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            large_log_threshold_bytes: DEFAULT_LARGE_LOG_THRESHOLD_BYTES,
            metadata_interval: DEFAULT_METADATA_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn with_metadata_interval(mut self, interval: Duration) -> Self {
        self.metadata_interval = interval;
        self
    }

    #[must_use]
    pub fn with_large_log_threshold(mut self, bytes: u64) -> Self {
        self.large_log_threshold_bytes = bytes;
        self
    }
}

/// Everything a full run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Org the logs were exported from.
    pub org: String,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Final counters.
    pub stats: RunStats,
    /// Summary rows in completion order.
    pub rows: Vec<SummaryRow>,
    /// Ledger file, when failures remain.
    pub ledger_path: Option<PathBuf>,
    /// Ids still failing after the retry pass.
    pub pending_ids: Vec<String>,
    /// Why the listing call failed; the run exported nothing when set.
    pub listing_error: Option<String>,
}

impl RunReport {
    /// True when every listed log is on disk and the listing itself succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none() && self.stats.is_clean()
    }
}

/// Shared state handed to every task of a run.
pub(crate) struct TaskContext {
    pub(crate) source: Arc<dyn LogSource>,
    pub(crate) downloader: BackoffDownloader,
    pub(crate) ledger: Arc<FailureLedger>,
    pub(crate) limiter: RateLimiter,
    pub(crate) observer: Arc<dyn ExportObserver>,
    pub(crate) export_root: PathBuf,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) large_log_threshold_bytes: u64,
}

/// Deletes the ledger on every exit path if it ended up empty.
struct LedgerCleanup(Arc<FailureLedger>);

impl Drop for LedgerCleanup {
    fn drop(&mut self) {
        self.0.delete_if_empty();
    }
}

/// Batched export engine.
pub struct ExportEngine {
    source: Arc<dyn LogSource>,
    config: ExportConfig,
    observer: Arc<dyn ExportObserver>,
}

impl ExportEngine {
    /// Creates an engine, validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidBatchSize`] if the batch size is outside
    /// 1..=100.
    pub fn new(source: Arc<dyn LogSource>, config: ExportConfig) -> Result<Self, EngineError> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&config.batch_size) {
            return Err(EngineError::InvalidBatchSize {
                value: config.batch_size,
            });
        }
        Ok(Self {
            source,
            config,
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replaces the default [`TracingObserver`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExportObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Runs a full export.
    ///
    /// A listing failure ends the run with nothing exported and is reported in
    /// [`RunReport::listing_error`]. Per-log failures never abort the run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ExportRoot`] if the export root or its scratch
    /// directory cannot be created.
    #[instrument(skip(self), fields(org = %self.source.org(), root = %self.config.export_root.display()))]
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        let started_at = Utc::now();
        let root = &self.config.export_root;

        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| EngineError::export_root(root, e))?;

        let (descriptors, listing_error) = match self.source.list_descriptors().await {
            Ok(descriptors) => (descriptors, None),
            Err(e) => {
                error!(error = %e, "failed to list logs, nothing to export");
                (Vec::new(), Some(e.to_string()))
            }
        };
        self.observer.on_event(&ExportEvent::Listed {
            total: descriptors.len(),
        });

        let ledger = Arc::new(FailureLedger::create(root.join(ledger_file_name(&started_at))));
        let _ledger_cleanup = LedgerCleanup(Arc::clone(&ledger));

        // Removed with all contents when dropped.
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
            .map_err(|e| EngineError::export_root(root, e))?;

        let ctx = Arc::new(TaskContext {
            source: Arc::clone(&self.source),
            downloader: BackoffDownloader::new(
                Arc::clone(&self.source),
                self.config.retry_policy.clone(),
                Arc::clone(&self.observer),
            ),
            ledger: Arc::clone(&ledger),
            limiter: RateLimiter::new(self.config.metadata_interval),
            observer: Arc::clone(&self.observer),
            export_root: root.clone(),
            scratch_dir: scratch.path().to_path_buf(),
            large_log_threshold_bytes: self.config.large_log_threshold_bytes,
        });

        let mut stats = RunStats::new(descriptors.len());
        let mut summary = SummaryAggregator::new();
        let failures = self
            .run_batches(&ctx, &descriptors, &mut stats, &mut summary)
            .await;

        let by_id: HashMap<String, ArtifactDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        retry_pass::run(&ctx, &by_id, &failures, &mut summary, &mut stats).await;

        let pending_ids = retry_pass::pending_ids(&ctx);
        let ledger_path = if pending_ids.is_empty() {
            None
        } else {
            Some(ledger.path().to_path_buf())
        };

        info!(
            total = stats.total,
            existing = stats.existing,
            downloaded = stats.downloaded,
            failed = stats.failed,
            recovered = stats.recovered,
            "export finished"
        );

        Ok(RunReport {
            org: self.source.org().to_string(),
            started_at,
            stats,
            rows: summary.into_rows(),
            ledger_path,
            pending_ids,
            listing_error,
        })
    }

    /// Runs every batch and returns what each failed artifact left behind.
    async fn run_batches(
        &self,
        ctx: &Arc<TaskContext>,
        descriptors: &[ArtifactDescriptor],
        stats: &mut RunStats,
        summary: &mut SummaryAggregator,
    ) -> HashMap<String, FailedArtifact> {
        let mut failures = HashMap::new();
        let batch_size = self.config.batch_size;
        let batches = descriptors.len().div_ceil(batch_size);
        let mut dispatched = 0;

        for (offset, batch) in descriptors.chunks(batch_size).enumerate() {
            let index = offset + 1;
            self.observer.on_event(&ExportEvent::BatchStarted {
                index,
                batches,
                size: batch.len(),
            });

            let mut unsettled: HashSet<String> = HashSet::with_capacity(batch.len());
            let mut set = JoinSet::new();
            for descriptor in batch {
                unsettled.insert(descriptor.id.clone());
                let ctx = Arc::clone(ctx);
                let descriptor = descriptor.clone();
                set.spawn(async move { task::run(&ctx, descriptor).await });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => {
                        unsettled.remove(&outcome.id);
                        stats.record(outcome.kind, outcome.local_io_failure);
                        if outcome.kind == OutcomeKind::Failed {
                            failures.insert(
                                outcome.id.clone(),
                                FailedArtifact {
                                    placeholder: outcome.placeholder,
                                    local_io_failure: outcome.local_io_failure,
                                },
                            );
                        }
                        if let Some(row) = outcome.row {
                            summary.push(row);
                        }
                        self.observer.on_event(&ExportEvent::TaskFinished {
                            id: outcome.id,
                            outcome: outcome.kind,
                        });
                    }
                    Err(e) => warn!(error = %e, "export task aborted"),
                }
            }

            // Tasks that never reported back panicked or were cancelled.
            for id in unsettled {
                error!(id = %id, "export task did not complete, counting as failed");
                stats.record(OutcomeKind::Failed, false);
                self.observer.on_event(&ExportEvent::TaskFinished {
                    id,
                    outcome: OutcomeKind::Failed,
                });
            }

            dispatched += batch.len();
            stats.batches += 1;
            debug!(batch = index, dispatched, "batch settled");
            self.observer.on_event(&ExportEvent::BatchFinished {
                index,
                stats: *stats,
                remaining: descriptors.len() - dispatched,
            });
        }
        failures
    }
}
