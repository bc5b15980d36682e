//! Run counters returned by the batch scheduler and the retry pass.

use serde::{Deserialize, Serialize};

use super::observer::OutcomeKind;

/// Counters for one export run.
///
/// Owned by the engine loop and updated only from settled task outcomes, so
/// no atomics are needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Descriptors returned by the listing call.
    pub total: usize,
    /// Artifacts already on disk.
    pub existing: usize,
    /// Artifacts downloaded during the batch phase.
    pub downloaded: usize,
    /// Artifacts whose latest attempt failed (retrieval or local I/O).
    pub failed: usize,
    /// Failures later fixed by the retry pass.
    pub recovered: usize,
    /// Subset of `failed` caused by local directory/write errors.
    pub io_failures: usize,
    /// Batches executed.
    pub batches: usize,
}

impl RunStats {
    /// Creates counters for a run over `total` descriptors.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Number of artifacts with a settled batch-phase outcome.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.existing + self.downloaded + self.failed + self.recovered
    }

    /// Records one batch-phase outcome.
    pub fn record(&mut self, outcome: OutcomeKind, local_io_failure: bool) {
        match outcome {
            OutcomeKind::Existing => self.existing += 1,
            OutcomeKind::Success => self.downloaded += 1,
            OutcomeKind::Failed => {
                self.failed += 1;
                if local_io_failure {
                    self.io_failures += 1;
                }
            }
        }
    }

    /// Moves one artifact from `failed` to `recovered`.
    ///
    /// `local_io_failure` must match what was recorded for the batch-phase
    /// failure so `io_failures` stays a subset of `failed`.
    pub fn record_recovery(&mut self, local_io_failure: bool) {
        self.failed = self.failed.saturating_sub(1);
        if local_io_failure {
            self.io_failures = self.io_failures.saturating_sub(1);
        }
        self.recovered += 1;
    }

    /// True when every artifact is on disk with real content.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
