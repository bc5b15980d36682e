//! Artifact records: list descriptors, enriched metadata, and summary rows.
//!
//! The listing call and the per-artifact metadata query return overlapping but
//! differently sparse records. [`ResolvedFields::merge`] is the single place
//! where the two are combined, using a fixed priority:
//! enriched metadata, then the list descriptor, then [`UNKNOWN`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal used when neither source provides a text field.
pub const UNKNOWN: &str = "Unknown";

/// Lightweight description of one log, as returned by the listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Stable remote identifier.
    pub id: String,
    /// Display name of the user the log belongs to.
    pub owner_name: Option<String>,
    /// Operation that produced the log (request path, trigger, etc.).
    pub operation: Option<String>,
    /// Remote status string.
    pub status: Option<String>,
    /// Duration of the logged operation.
    pub duration_ms: Option<u64>,
    /// Log size in bytes.
    pub size_bytes: Option<u64>,
    /// When the logged operation started.
    pub start_time: Option<DateTime<Utc>>,
}

impl ArtifactDescriptor {
    /// Creates a descriptor with only an id set.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Detailed metadata for one log, fetched per artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichedMetadata {
    pub owner_name: Option<String>,
    /// Login (username) of the owner; only available from enrichment.
    pub owner_login: Option<String>,
    pub operation: Option<String>,
    pub status: Option<String>,
    pub duration_ms: Option<u64>,
    pub size_bytes: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
}

/// Field values after applying the enrichment > descriptor > "Unknown" priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFields {
    pub owner: String,
    pub owner_login: String,
    pub operation: String,
    pub status: String,
    pub duration_ms: Option<u64>,
    pub size_bytes: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
}

impl ResolvedFields {
    /// Merges enriched metadata (if any) over the list descriptor.
    #[must_use]
    pub fn merge(descriptor: &ArtifactDescriptor, enriched: Option<&EnrichedMetadata>) -> Self {
        let text = |from_meta: Option<&Option<String>>, from_list: &Option<String>| {
            from_meta
                .and_then(non_blank)
                .or_else(|| non_blank(from_list))
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        Self {
            owner: text(enriched.map(|m| &m.owner_name), &descriptor.owner_name),
            owner_login: text(enriched.map(|m| &m.owner_login), &None),
            operation: text(enriched.map(|m| &m.operation), &descriptor.operation),
            status: text(enriched.map(|m| &m.status), &descriptor.status),
            duration_ms: enriched
                .and_then(|m| m.duration_ms)
                .or(descriptor.duration_ms),
            size_bytes: enriched.and_then(|m| m.size_bytes).or(descriptor.size_bytes),
            start_time: enriched.and_then(|m| m.start_time).or(descriptor.start_time),
        }
    }

    /// Builds the summary row for a file written (or found) at `relative_file_path`.
    #[must_use]
    pub fn to_summary_row(&self, file_name: String, relative_file_path: String) -> SummaryRow {
        SummaryRow {
            owner: self.owner.clone(),
            owner_login: self.owner_login.clone(),
            operation: self.operation.clone(),
            status: self.status.clone(),
            duration_ms: self.duration_ms,
            size_bytes: self.size_bytes,
            start_time: self.start_time,
            file_name,
            relative_file_path,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// One row of the run summary handed to report renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub owner: String,
    pub owner_login: String,
    pub operation: String,
    pub status: String,
    pub duration_ms: Option<u64>,
    pub size_bytes: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
    /// File name, unique per artifact (`<id>.log`).
    pub file_name: String,
    /// Path relative to the export root, `/`-separated.
    pub relative_file_path: String,
}
