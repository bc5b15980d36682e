//! Bulk export pipeline: batches, retries, failure ledger, summary.
//!
//! This module turns a [`LogSource`](crate::source::LogSource) listing into
//! files on disk under `<root>/<MM-DD-YY>/<owner>/<id>.log`.
//!
//! # Features
//!
//! - Fixed-size batches of concurrent tasks, batches run one after another
//! - Bounded retries with size- and error-aware backoff
//! - Placeholder files for logs that could not be retrieved
//! - Persisted failure ledger swept by a sequential retry pass
//! - Idempotent reruns: existing real exports are never downloaded again
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exporter_core::export::{ExportConfig, ExportEngine};
//! use exporter_core::source::{CommandLimits, CommandLogSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(CommandLogSource::new("sf", Some("prod".into()), CommandLimits::default()));
//! let report = ExportEngine::new(source, ExportConfig::new("./logs"))?.run().await?;
//! for id in &report.pending_ids {
//!     println!("still failing: {id}");
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod engine;
mod ledger;
mod observer;
pub mod path;
pub mod rate_limiter;
mod retry;
mod stats;
mod summary;

pub use backoff::{BackoffDownloader, SENTINEL_MARKER, is_sentinel, sentinel_payload};
pub use engine::{
    DEFAULT_BATCH_SIZE, DEFAULT_LARGE_LOG_THRESHOLD_BYTES, EngineError, ExportConfig,
    ExportEngine, RunReport, TaskOutcome,
};
pub use ledger::{FailureLedger, LedgerEntry, ledger_file_name};
pub use observer::{ExportEvent, ExportObserver, OutcomeKind, TracingObserver};
pub use rate_limiter::{DEFAULT_METADATA_INTERVAL, RateLimiter};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_JITTER, FailureType,
    LARGE_SIZE_HINT_BYTES, RetryDecision, RetryPolicy, classify_error,
};
pub use stats::RunStats;
pub use summary::SummaryAggregator;
