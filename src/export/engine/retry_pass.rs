//! Sequential second chance for every id left in the failure ledger.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::TaskContext;
use super::task::has_valid_export;
use crate::artifact::{ArtifactDescriptor, ResolvedFields};
use crate::export::backoff::is_sentinel;
use crate::export::observer::ExportEvent;
use crate::export::stats::RunStats;
use crate::export::summary::SummaryAggregator;

/// What the batch phase left behind for one failed artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FailedArtifact {
    /// Placeholder written at the path resolved during the batch phase.
    pub(crate) placeholder: Option<PathBuf>,
    /// The failure was a local directory or write error.
    pub(crate) local_io_failure: bool,
}

/// Ledger ids in file order, duplicates removed.
pub(crate) fn pending_ids(ctx: &TaskContext) -> Vec<String> {
    let mut seen = HashSet::new();
    ctx.ledger
        .read_ids()
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Retries every ledger entry once, one at a time.
///
/// Recovered ids are removed from the ledger, their summary row is upserted,
/// and one count moves from `failed` to `recovered`. A placeholder the batch
/// phase wrote under a different owner is deleted. The ledger file is deleted
/// afterwards if nothing is left in it.
#[instrument(skip_all)]
pub(crate) async fn run(
    ctx: &TaskContext,
    descriptors: &HashMap<String, ArtifactDescriptor>,
    failures: &HashMap<String, FailedArtifact>,
    summary: &mut SummaryAggregator,
    stats: &mut RunStats,
) {
    let ids = pending_ids(ctx);
    if ids.is_empty() {
        ctx.ledger.delete_if_empty();
        return;
    }

    ctx.observer
        .on_event(&ExportEvent::RetryPassStarted { pending: ids.len() });

    let mut recovered = 0;
    for id in &ids {
        let Some(descriptor) = descriptors.get(id) else {
            warn!(id = %id, "ledger entry has no matching descriptor, skipping");
            continue;
        };

        let metadata = ctx.fetch_metadata(id).await;
        let fields = ResolvedFields::merge(descriptor, metadata.as_ref());
        let target = ctx.target_path(&fields, id);

        if has_valid_export(&target).await {
            debug!(id = %id, path = %target.display(), "failed log now present on disk");
        } else {
            let content = ctx
                .downloader
                .download(id, fields.size_bytes, |_| {})
                .await;
            if is_sentinel(&content) {
                info!(id = %id, "log still unavailable after retry");
                continue;
            }
            if let Err(e) = ctx.write_content(id, &target, &content).await {
                warn!(id = %id, path = %target.display(), error = %e, "failed to write recovered log");
                continue;
            }
        }

        let failure = failures.get(id).cloned().unwrap_or_default();
        if let Some(stale) = &failure.placeholder {
            ctx.discard_stale_placeholder(id, stale, &target).await;
        }
        summary.upsert(ctx.summary_row(&fields, &target));
        ctx.ledger.remove(id);
        stats.record_recovery(failure.local_io_failure);
        recovered += 1;
    }

    let still_failed = pending_ids(ctx).len();
    ctx.observer.on_event(&ExportEvent::RetryPassFinished {
        recovered,
        still_failed,
    });
    ctx.ledger.delete_if_empty();
}
