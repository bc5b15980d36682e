//! Rendering of the final run summary.
//!
//! [`ReportRenderer`] is the seam for output formats; [`JsonReportRenderer`]
//! writes `export_summary_<YYYYmmdd_HHMMSS>.json` next to the exported logs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::artifact::SummaryRow;
use crate::export::{RunReport, RunStats, SummaryAggregator};

/// Errors from report rendering.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Could not write the report file.
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not serialize the report.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Consumes a finished run and produces some output artifact.
pub trait ReportRenderer {
    /// Renders `report`, returning where the output was written.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the output cannot be produced.
    fn render(&self, report: &RunReport) -> Result<PathBuf, ReportError>;
}

/// On-disk shape of the JSON summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub org: String,
    pub started_at: DateTime<Utc>,
    pub stats: RunStats,
    pub ledger_path: Option<PathBuf>,
    pub pending_ids: Vec<String>,
    /// Set when the listing call failed and nothing was exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
    /// Rows ordered by start time.
    pub rows: Vec<SummaryRow>,
}

impl SummaryDocument {
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            org: report.org.clone(),
            started_at: report.started_at,
            stats: report.stats,
            ledger_path: report.ledger_path.clone(),
            pending_ids: report.pending_ids.clone(),
            listing_error: report.listing_error.clone(),
            rows: SummaryAggregator::sorted_by_start_time(&report.rows),
        }
    }
}

/// Summary file name for a run started at `started_at`.
#[must_use]
pub fn summary_file_name(started_at: &DateTime<Utc>) -> String {
    format!("export_summary_{}.json", started_at.format("%Y%m%d_%H%M%S"))
}

/// Writes pretty-printed JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonReportRenderer {
    output_dir: PathBuf,
}

impl JsonReportRenderer {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ReportRenderer for JsonReportRenderer {
    #[instrument(skip_all, fields(rows = report.rows.len()))]
    fn render(&self, report: &RunReport) -> Result<PathBuf, ReportError> {
        let path = self.output_dir.join(summary_file_name(&report.started_at));
        let json = serde_json::to_string_pretty(&SummaryDocument::from_report(report))?;
        std::fs::write(&path, json).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "summary written");
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn row(file_name: &str, hour: Option<u32>) -> SummaryRow {
        SummaryRow {
            owner: "Ada".to_string(),
            owner_login: "ada@example.com".to_string(),
            operation: "/apex/Page".to_string(),
            status: "Success".to_string(),
            duration_ms: Some(12),
            size_bytes: Some(2048),
            start_time: hour.map(|h| Utc.with_ymd_and_hms(2024, 3, 9, h, 0, 0).unwrap()),
            file_name: file_name.to_string(),
            relative_file_path: format!("03-09-24/Ada/{file_name}"),
        }
    }

    fn report() -> RunReport {
        RunReport {
            org: "prod".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap(),
            stats: RunStats::new(2),
            rows: vec![row("b.log", Some(9)), row("a.log", Some(7))],
            ledger_path: None,
            pending_ids: Vec::new(),
            listing_error: None,
        }
    }

    #[test]
    fn test_summary_file_name() {
        let started = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 5).unwrap();
        assert_eq!(summary_file_name(&started), "export_summary_20240310_083005.json");
    }

    #[test]
    fn test_json_renderer_writes_sorted_rows() {
        let dir = TempDir::new().unwrap();
        let renderer = JsonReportRenderer::new(dir.path());

        let path = renderer.render(&report()).unwrap();

        assert_eq!(path, dir.path().join("export_summary_20240310_083000.json"));
        let document: SummaryDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document.org, "prod");
        assert_eq!(document.stats.total, 2);
        let names: Vec<_> = document.rows.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.log", "b.log"]);
        assert!(document.listing_error.is_none());
    }

    #[test]
    fn test_json_renderer_records_listing_error() {
        let dir = TempDir::new().unwrap();
        let renderer = JsonReportRenderer::new(dir.path());
        let report = RunReport {
            stats: RunStats::default(),
            rows: Vec::new(),
            listing_error: Some("command `sf apex list log` failed".to_string()),
            ..report()
        };

        let path = renderer.render(&report).unwrap();

        let document: SummaryDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            document.listing_error.as_deref(),
            Some("command `sf apex list log` failed")
        );
    }

    #[test]
    fn test_json_renderer_reports_missing_directory() {
        let dir = TempDir::new().unwrap();
        let renderer = JsonReportRenderer::new(dir.path().join("missing"));
        let result = renderer.render(&report());
        assert!(matches!(result, Err(ReportError::Write { .. })));
    }
}
