//! Text-backed ledger of artifacts whose latest retrieval failed.
//!
//! One `id:reason` line per entry. The reason is free text and is not escaped,
//! so parsing splits on the first colon only. An id is present if and only if
//! its most recent attempt failed and has not been retried successfully.
//!
//! Every operation is best-effort: I/O errors are logged and swallowed so a
//! ledger problem can never abort an export.
//!
//! Operations are blocking `std::fs` calls made directly on the calling async
//! worker. [`FailureLedger::append`] runs inside the synchronous terminal
//! failure callback of the backoff downloader, and each call touches one small
//! file holding at most one line per listed log.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// One parsed ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub artifact_id: String,
    pub reason: String,
}

/// Ledger file name for a run started at `started_at`.
#[must_use]
pub fn ledger_file_name(started_at: &DateTime<Utc>) -> String {
    format!("failed_downloads_{}.txt", started_at.format("%Y%m%d_%H%M%S"))
}

/// Append-only, then mutable, failure ledger.
///
/// Appends come from concurrent batch tasks; a mutex serializes them with the
/// full-file rewrites done by [`FailureLedger::remove`].
#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLedger {
    /// Creates (or truncates) the ledger file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let ledger = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        if let Err(error) = fs::write(&ledger.path, "") {
            warn!(path = %ledger.path.display(), error = %error, "failed to create failure ledger");
        } else {
            debug!(path = %ledger.path.display(), "failure ledger created");
        }
        ledger
    }

    /// Returns the ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry.
    pub fn append(&self, id: &str, reason: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let line = format!("{id}:{}\n", single_line(reason));
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result {
            warn!(id, path = %self.path.display(), error = %error, "failed to append to failure ledger");
        }
    }

    /// Returns all entries in file order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read_raw() {
            Ok(raw) => raw.lines().filter_map(parse_line).collect(),
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to read failure ledger");
                Vec::new()
            }
        }
    }

    /// Returns the ids of all entries in file order.
    #[must_use]
    pub fn read_ids(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.artifact_id)
            .collect()
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.entries().iter().any(|entry| entry.artifact_id == id)
    }

    /// Rewrites the file without any line for `id`.
    pub fn remove(&self, id: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = match self.read_raw() {
            Ok(raw) => raw,
            Err(error) => {
                warn!(id, path = %self.path.display(), error = %error, "failed to read failure ledger");
                return;
            }
        };
        let kept: String = raw
            .lines()
            .filter(|line| parse_line(line).is_some_and(|entry| entry.artifact_id != id))
            .map(|line| format!("{line}\n"))
            .collect();
        if let Err(error) = fs::write(&self.path, kept) {
            warn!(id, path = %self.path.display(), error = %error, "failed to rewrite failure ledger");
        }
    }

    /// Deletes the file when it holds no entries. Returns true if deleted.
    pub fn delete_if_empty(&self) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let empty = match self.read_raw() {
            Ok(raw) => raw.trim().is_empty(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => return false,
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to read failure ledger");
                return false;
            }
        };
        if !empty {
            return false;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed empty failure ledger");
                true
            }
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to remove empty failure ledger");
                false
            }
        }
    }

    fn read_raw(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

fn parse_line(line: &str) -> Option<LedgerEntry> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    let (id, reason) = line.split_once(':').unwrap_or((line, ""));
    Some(LedgerEntry {
        artifact_id: id.trim().to_string(),
        reason: reason.to_string(),
    })
}

/// Keeps one entry on one line.
fn single_line(reason: &str) -> String {
    reason
        .lines()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
