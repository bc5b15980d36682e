//! Shared helpers for export integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use exporter_core::export::{ExportConfig, ExportEvent, ExportObserver, RetryPolicy};
use exporter_core::{ArtifactDescriptor, EnrichedMetadata, LogSource, SourceError};

/// Attempts per log in the fast test policy.
pub const TEST_MAX_ATTEMPTS: u32 = 3;

/// In-memory log source with scripted failures.
#[derive(Default)]
pub struct ScriptedSource {
    descriptors: Vec<ArtifactDescriptor>,
    metadata: HashMap<String, EnrichedMetadata>,
    metadata_errors: HashSet<String>,
    remaining_metadata_failures: Mutex<HashMap<String, u32>>,
    remaining_failures: Mutex<HashMap<String, u32>>,
    list_error: bool,
    retrieval_delay: Duration,
    retrievals: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(descriptors: Vec<ArtifactDescriptor>) -> Self {
        Self {
            descriptors,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, id: &str, metadata: EnrichedMetadata) -> Self {
        self.metadata.insert(id.to_string(), metadata);
        self
    }

    pub fn with_metadata_error(mut self, id: &str) -> Self {
        self.metadata_errors.insert(id.to_string());
        self
    }

    /// The next `times` metadata calls for `id` fail; later calls succeed.
    pub fn fail_metadata_times(self, id: &str, times: u32) -> Self {
        if let Ok(mut failures) = self.remaining_metadata_failures.lock() {
            failures.insert(id.to_string(), times);
        }
        self
    }

    /// The next `times` retrievals of `id` fail with a transient error.
    pub fn fail_times(self, id: &str, times: u32) -> Self {
        if let Ok(mut failures) = self.remaining_failures.lock() {
            failures.insert(id.to_string(), times);
        }
        self
    }

    pub fn fail_always(self, id: &str) -> Self {
        self.fail_times(id, u32::MAX)
    }

    pub fn with_list_error(mut self) -> Self {
        self.list_error = true;
        self
    }

    pub fn with_retrieval_delay(mut self, delay: Duration) -> Self {
        self.retrieval_delay = delay;
        self
    }

    pub fn retrievals(&self, id: &str) -> u32 {
        self.retrievals
            .lock()
            .map(|calls| calls.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_retrievals(&self) -> u32 {
        self.retrievals
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    fn org(&self) -> &str {
        "scripted"
    }

    async fn list_descriptors(&self) -> Result<Vec<ArtifactDescriptor>, SourceError> {
        if self.list_error {
            return Err(SourceError::command_failed(
                "sf apex list log",
                1,
                "NamedOrgNotFound: no org named scripted",
            ));
        }
        Ok(self.descriptors.clone())
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Option<EnrichedMetadata>, SourceError> {
        let transient = self
            .remaining_metadata_failures
            .lock()
            .map(|mut failures| match failures.get_mut(id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if transient || self.metadata_errors.contains(id) {
            return Err(SourceError::command_failed("sf data query", 1, "INVALID_FIELD"));
        }
        Ok(self.metadata.get(id).cloned())
    }

    async fn retrieve_content(&self, id: &str, _size_hint: Option<u64>) -> Result<String, SourceError> {
        if let Ok(mut calls) = self.retrievals.lock() {
            *calls.entry(id.to_string()).or_insert(0) += 1;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.retrieval_delay.is_zero() {
            tokio::time::sleep(self.retrieval_delay).await;
        }

        let fail = self
            .remaining_failures
            .lock()
            .map(|mut failures| match failures.get_mut(id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fail {
            Err(SourceError::command_failed("sf apex get log", 1, "read ECONNRESET"))
        } else {
            Ok(log_body(id))
        }
    }
}

/// Content the scripted source returns for `id`.
pub fn log_body(id: &str) -> String {
    format!("59.0 APEX_CODE,FINEST\n12:00:00.0 (1)|EXECUTION_STARTED\n{id}\n")
}

/// Descriptor owned by `owner`, started on 2024-03-09 at `hour`:00 UTC.
pub fn descriptor(id: &str, owner: &str, hour: u32) -> ArtifactDescriptor {
    ArtifactDescriptor {
        id: id.to_string(),
        owner_name: Some(owner.to_string()),
        operation: Some("/apex/Console".to_string()),
        status: Some("Success".to_string()),
        duration_ms: Some(25),
        size_bytes: Some(1024),
        start_time: Utc.with_ymd_and_hms(2024, 3, 9, hour, 0, 0).single(),
    }
}

/// `n` descriptors with ids `07L00000000000{i}`-style, all owned by Ada.
pub fn descriptors(n: usize) -> Vec<ArtifactDescriptor> {
    (1..=n)
        .map(|i| descriptor(&log_id(i), "Ada Lovelace", 10))
        .collect()
}

/// 15-character log id for index `i`.
pub fn log_id(i: usize) -> String {
    format!("07L{i:012}")
}

/// Engine config with no jitter, 1ms backoff, and no metadata throttle.
pub fn fast_config(root: &Path) -> ExportConfig {
    ExportConfig::new(root)
        .with_retry_policy(RetryPolicy::new(
            TEST_MAX_ATTEMPTS,
            Duration::from_millis(1),
            Duration::ZERO,
        ))
        .with_metadata_interval(Duration::ZERO)
}

/// Observer that keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExportEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ExportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ExportObserver for RecordingObserver {
    fn on_event(&self, event: &ExportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
