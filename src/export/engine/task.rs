//! Per-artifact export state machine.
//!
//! ```text
//! CheckExists ─┬─> Existing (metadata still fetched for the row)
//!              └─> MetadataFetch -> RecomputePath -> DoubleCheckExists ─┬─> Existing
//!                                                                      └─> Download -> Write -> Success | Failed
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};

use super::TaskContext;
use crate::artifact::{ArtifactDescriptor, EnrichedMetadata, ResolvedFields, SummaryRow};
use crate::export::backoff::{SENTINEL_MARKER, is_sentinel};
use crate::export::observer::{ExportEvent, OutcomeKind};
use crate::export::path;

/// Settled result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Artifact id.
    pub id: String,
    /// Classification.
    pub kind: OutcomeKind,
    /// Summary row; absent when nothing was written.
    pub row: Option<SummaryRow>,
    /// True when the failure came from a local directory or write error.
    pub local_io_failure: bool,
    /// Failure placeholder written by this task.
    pub placeholder: Option<PathBuf>,
}

impl TaskOutcome {
    fn new(id: &str, kind: OutcomeKind, row: Option<SummaryRow>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            row,
            local_io_failure: false,
            placeholder: None,
        }
    }

    fn local_io_failure(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: OutcomeKind::Failed,
            row: None,
            local_io_failure: true,
            placeholder: None,
        }
    }
}

/// Runs one artifact through the export state machine.
pub(crate) async fn run(ctx: &TaskContext, descriptor: ArtifactDescriptor) -> TaskOutcome {
    let id = descriptor.id.as_str();

    // Quick check from list data only.
    let quick = ResolvedFields::merge(&descriptor, None);
    let quick_path = ctx.target_path(&quick, id);
    if has_valid_export(&quick_path).await {
        debug!(id, path = %quick_path.display(), "log already exported");
        let metadata = ctx.fetch_metadata(id).await;
        let fields = ResolvedFields::merge(&descriptor, metadata.as_ref());
        let row = ctx.summary_row(&fields, &quick_path);
        return TaskOutcome::new(id, OutcomeKind::Existing, Some(row));
    }

    let metadata = ctx.fetch_metadata(id).await;
    let fields = ResolvedFields::merge(&descriptor, metadata.as_ref());
    let target = ctx.target_path(&fields, id);

    if target != quick_path {
        ctx.observer.on_event(&ExportEvent::PathChanged {
            id: id.to_string(),
            quick: quick_path.clone(),
            resolved: target.clone(),
        });
        if has_valid_export(&target).await {
            debug!(id, path = %target.display(), "log already exported under enriched owner");
            let row = ctx.summary_row(&fields, &target);
            return TaskOutcome::new(id, OutcomeKind::Existing, Some(row));
        }
    }

    if let Some(size_bytes) = fields
        .size_bytes
        .filter(|size| *size > ctx.large_log_threshold_bytes)
    {
        ctx.observer.on_event(&ExportEvent::LargeArtifact {
            id: id.to_string(),
            size_bytes,
        });
    }

    let content = ctx
        .downloader
        .download(id, fields.size_bytes, |reason| ctx.ledger.append(id, reason))
        .await;

    if let Err(e) = ctx.write_content(id, &target, &content).await {
        error!(id, path = %target.display(), error = %e, "failed to write log file");
        return TaskOutcome::local_io_failure(id);
    }

    let row = Some(ctx.summary_row(&fields, &target));
    if is_sentinel(&content) {
        return TaskOutcome {
            placeholder: Some(target),
            ..TaskOutcome::new(id, OutcomeKind::Failed, row)
        };
    }
    if target != quick_path {
        ctx.discard_stale_placeholder(id, &quick_path, &target).await;
    }
    TaskOutcome::new(id, OutcomeKind::Success, row)
}

impl TaskContext {
    pub(crate) fn target_path(&self, fields: &ResolvedFields, id: &str) -> PathBuf {
        path::resolve(
            &self.export_root,
            fields.start_time.as_ref(),
            &fields.owner,
            id,
        )
    }

    pub(crate) fn summary_row(&self, fields: &ResolvedFields, target: &Path) -> SummaryRow {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        fields.to_summary_row(file_name, path::relative_display(&self.export_root, target))
    }

    /// Throttled metadata fetch. Errors are logged and treated as "no metadata".
    pub(crate) async fn fetch_metadata(&self, id: &str) -> Option<EnrichedMetadata> {
        self.limiter.acquire(self.source.org()).await;
        match self.source.fetch_metadata(id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(id, error = %e, "metadata fetch failed, using list data");
                None
            }
        }
    }

    /// Writes `content` to a scratch file and renames it over `target`.
    pub(crate) async fn write_content(&self, id: &str, target: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let scratch = self.scratch_dir.join(format!("{}.part", path::file_name(id)));
        tokio::fs::write(&scratch, content).await?;
        if let Err(e) = tokio::fs::rename(&scratch, target).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e);
        }
        Ok(())
    }

    /// Deletes a failure placeholder left at `stale` once the log is on disk at
    /// `target`.
    pub(crate) async fn discard_stale_placeholder(&self, id: &str, stale: &Path, target: &Path) {
        if stale == target || !has_placeholder(stale).await {
            return;
        }
        match tokio::fs::remove_file(stale).await {
            Ok(()) => debug!(id, path = %stale.display(), "removed stale failure placeholder"),
            Err(e) => warn!(id, path = %stale.display(), error = %e, "failed to remove stale failure placeholder"),
        }
    }
}

/// True when `path` is a file holding real content (not a failure placeholder).
pub(crate) async fn has_valid_export(path: &Path) -> bool {
    read_prefix(path)
        .await
        .is_some_and(|prefix| !prefix.starts_with(SENTINEL_MARKER.as_bytes()))
}

/// True when `path` is a file holding a failure placeholder.
pub(crate) async fn has_placeholder(path: &Path) -> bool {
    read_prefix(path)
        .await
        .is_some_and(|prefix| prefix.starts_with(SENTINEL_MARKER.as_bytes()))
}

/// Up to `SENTINEL_MARKER.len()` leading bytes of a regular file.
async fn read_prefix(path: &Path) -> Option<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    if !file.metadata().await.ok()?.is_file() {
        return None;
    }
    let mut prefix = vec![0_u8; SENTINEL_MARKER.len()];
    let mut filled = 0;
    while filled < prefix.len() {
        match file.read(&mut prefix[filled..]).await.ok()? {
            0 => break,
            n => filled += n,
        }
    }
    prefix.truncate(filled);
    Some(prefix)
}
