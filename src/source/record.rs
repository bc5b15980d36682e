//! Wire records returned by the platform CLI in `--json` mode.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::artifact::{ArtifactDescriptor, EnrichedMetadata};

/// Top-level `--json` envelope: `{"status": 0, "result": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct CliEnvelope<T> {
    #[serde(default)]
    pub status: i32,
    pub result: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result shape of `data query`.
#[derive(Debug, Deserialize)]
pub(crate) struct QueryResult {
    #[serde(default)]
    pub records: Vec<LogRecord>,
}

/// One debug log row, as emitted by both the list and query commands.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LogRecord {
    pub id: String,
    #[serde(default)]
    pub log_user: Option<LogUser>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration_milliseconds: Option<u64>,
    #[serde(default)]
    pub log_length: Option<u64>,
    #[serde(default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LogUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl LogRecord {
    pub(crate) fn into_descriptor(self) -> ArtifactDescriptor {
        ArtifactDescriptor {
            start_time: self.start_time.as_deref().and_then(parse_start_time),
            owner_name: self.log_user.and_then(|user| user.name),
            id: self.id,
            operation: self.operation,
            status: self.status,
            duration_ms: self.duration_milliseconds,
            size_bytes: self.log_length,
        }
    }

    pub(crate) fn into_metadata(self) -> EnrichedMetadata {
        let (owner_name, owner_login) = match self.log_user {
            Some(user) => (user.name, user.username),
            None => (None, None),
        };
        EnrichedMetadata {
            start_time: self.start_time.as_deref().and_then(parse_start_time),
            owner_name,
            owner_login,
            operation: self.operation,
            status: self.status,
            duration_ms: self.duration_milliseconds,
            size_bytes: self.log_length,
        }
    }
}

/// Parses platform timestamps such as `2024-03-09T10:00:00.000+0000`.
///
/// Falls back to RFC 3339 (`2024-03-09T10:00:00Z`).
pub(crate) fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
