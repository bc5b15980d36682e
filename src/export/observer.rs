//! Structured progress events emitted by the export engine.
//!
//! The engine reports everything user-visible through one [`ExportObserver`].
//! [`TracingObserver`] is the default and turns events into log lines; the CLI
//! layers a progress bar on top, and tests use counting observers.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::stats::RunStats;

/// Kind of terminal outcome for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Already present on disk; nothing downloaded.
    Existing,
    /// Downloaded and written.
    Success,
    /// Retrieval or local write failed.
    Failed,
}

/// One event in the life of an export run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    /// The listing call returned.
    Listed {
        /// Number of descriptors returned.
        total: usize,
    },
    /// A batch is about to start.
    BatchStarted {
        /// 1-indexed batch number.
        index: usize,
        /// Number of batches in the run.
        batches: usize,
        /// Number of tasks in this batch.
        size: usize,
    },
    /// A content retrieval call started.
    RetrievalStarted {
        /// Artifact id.
        id: String,
    },
    /// A content retrieval call returned (successfully or not).
    RetrievalFinished {
        /// Artifact id.
        id: String,
    },
    /// A retrieval attempt failed and will be retried.
    RetryScheduled {
        /// Artifact id.
        id: String,
        /// Attempt number about to run.
        attempt: u32,
        /// Delay before that attempt.
        delay: Duration,
        /// Error from the failed attempt.
        error: String,
    },
    /// An artifact above the large-log threshold is about to be downloaded.
    LargeArtifact {
        /// Artifact id.
        id: String,
        /// Known size in bytes.
        size_bytes: u64,
    },
    /// Enrichment moved an artifact to a different owner directory than the
    /// quick check looked at.
    PathChanged {
        /// Artifact id.
        id: String,
        /// Path derived from the list descriptor.
        quick: PathBuf,
        /// Path derived from enriched metadata.
        resolved: PathBuf,
    },
    /// One artifact finished.
    TaskFinished {
        /// Artifact id.
        id: String,
        /// Outcome classification.
        outcome: OutcomeKind,
    },
    /// A batch settled. Checkpoint for resource-pressure observation.
    BatchFinished {
        /// 1-indexed batch number.
        index: usize,
        /// Counters after this batch.
        stats: RunStats,
        /// Descriptors not yet processed.
        remaining: usize,
    },
    /// The retry pass is starting.
    RetryPassStarted {
        /// Number of ledger entries to sweep.
        pending: usize,
    },
    /// The retry pass finished.
    RetryPassFinished {
        /// Artifacts recovered during the pass.
        recovered: usize,
        /// Ledger entries still pending.
        still_failed: usize,
    },
}

/// Receiver of export events.
///
/// Called concurrently from batch tasks; implementations must be cheap and
/// must not block.
pub trait ExportObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &ExportEvent);
}

/// Observer that writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExportObserver for TracingObserver {
    fn on_event(&self, event: &ExportEvent) {
        match event {
            ExportEvent::Listed { total } => info!(total, "listed logs"),
            ExportEvent::BatchStarted {
                index,
                batches,
                size,
            } => debug!(index, batches, size, "starting batch"),
            ExportEvent::RetrievalStarted { id } => debug!(id = %id, "retrieval started"),
            ExportEvent::RetrievalFinished { id } => debug!(id = %id, "retrieval finished"),
            ExportEvent::RetryScheduled {
                id,
                attempt,
                delay,
                error,
            } => info!(
                id = %id,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "retrying log retrieval"
            ),
            ExportEvent::LargeArtifact { id, size_bytes } => {
                info!(id = %id, size_bytes, "downloading large log");
            }
            ExportEvent::PathChanged { id, quick, resolved } => warn!(
                id = %id,
                quick = %quick.display(),
                resolved = %resolved.display(),
                "owner directory changed after enrichment; duplicates across owner renames are not reconciled"
            ),
            ExportEvent::TaskFinished { id, outcome } => debug!(id = %id, ?outcome, "log processed"),
            ExportEvent::BatchFinished {
                index,
                stats,
                remaining,
            } => info!(
                batch = index,
                existing = stats.existing,
                downloaded = stats.downloaded,
                failed = stats.failed,
                remaining,
                "batch complete"
            ),
            ExportEvent::RetryPassStarted { pending } => {
                info!(pending, "retrying failed downloads sequentially");
            }
            ExportEvent::RetryPassFinished {
                recovered,
                still_failed,
            } => info!(recovered, still_failed, "retry pass complete"),
        }
    }
}
