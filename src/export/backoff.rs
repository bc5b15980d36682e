//! Bounded-retry content retrieval.
//!
//! [`BackoffDownloader::download`] never returns an error. A retrieval that
//! exhausts its attempts (or hits a permanent failure) yields a sentinel
//! payload instead, which callers detect with [`is_sentinel`].

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::observer::{ExportEvent, ExportObserver};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::source::LogSource;

/// Prefix shared by every sentinel payload.
pub const SENTINEL_MARKER: &str = "ERROR: Unable to retrieve";

/// Builds the placeholder content written when retrieval gives up.
#[must_use]
pub fn sentinel_payload(id: &str, attempts: u32, last_error: &str, size_hint: Option<u64>) -> String {
    let mut payload =
        format!("{SENTINEL_MARKER} log {id} after {attempts} attempt(s): {last_error}");
    if let Some(size) = size_hint {
        payload.push_str(&format!(" (size: {size} bytes)"));
    }
    payload
}

/// True when `text` is (or contains) a sentinel payload.
#[must_use]
pub fn is_sentinel(text: &str) -> bool {
    text.contains(SENTINEL_MARKER)
}

/// Retrieves log content with retries and backoff.
#[derive(Clone)]
pub struct BackoffDownloader {
    source: Arc<dyn LogSource>,
    policy: RetryPolicy,
    observer: Arc<dyn ExportObserver>,
}

impl BackoffDownloader {
    #[must_use]
    pub fn new(
        source: Arc<dyn LogSource>,
        policy: RetryPolicy,
        observer: Arc<dyn ExportObserver>,
    ) -> Self {
        Self {
            source,
            policy,
            observer,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Downloads the content of log `id`.
    ///
    /// On terminal failure `on_terminal_failure` is called once with the last
    /// error message and the sentinel payload is returned.
    #[instrument(skip(self, on_terminal_failure), fields(max_attempts = self.policy.max_attempts()))]
    pub async fn download<F>(&self, id: &str, size_hint: Option<u64>, on_terminal_failure: F) -> String
    where
        F: FnOnce(&str),
    {
        let mut attempt: u32 = 1;

        loop {
            self.observer.on_event(&ExportEvent::RetrievalStarted { id: id.to_string() });
            let result = self.source.retrieve_content(id, size_hint).await;
            self.observer.on_event(&ExportEvent::RetrievalFinished { id: id.to_string() });

            let error = match result {
                Ok(content) => {
                    debug!(id, attempt, bytes = content.len(), "retrieved log content");
                    return content;
                }
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let message = error.to_string();

            match self.policy.should_retry(failure_type, attempt, size_hint) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    self.observer.on_event(&ExportEvent::RetryScheduled {
                        id: id.to_string(),
                        attempt: next_attempt,
                        delay,
                        error: message,
                    });
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(
                        id,
                        attempts = attempt,
                        ?failure_type,
                        error = %message,
                        reason = %reason,
                        "giving up on log retrieval"
                    );
                    on_terminal_failure(&message);
                    return sentinel_payload(id, attempt, &message, size_hint);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::artifact::{ArtifactDescriptor, EnrichedMetadata};
    use crate::export::observer::TracingObserver;
    use crate::source::SourceError;

    /// Fails each id a scripted number of times, then succeeds.
    struct Flaky {
        failures: Mutex<HashMap<String, u32>>,
        error: fn() -> SourceError,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(id: &str, failures: u32, error: fn() -> SourceError) -> Self {
            Self {
                failures: Mutex::new(HashMap::from([(id.to_string(), failures)])),
                error,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LogSource for Flaky {
        fn org(&self) -> &str {
            "test"
        }

        async fn list_descriptors(&self) -> Result<Vec<ArtifactDescriptor>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_metadata(&self, _id: &str) -> Result<Option<EnrichedMetadata>, SourceError> {
            Ok(None)
        }

        async fn retrieve_content(&self, id: &str, _size_hint: Option<u64>) -> Result<String, SourceError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            let remaining = failures.entry(id.to_string()).or_insert(0);
            if *remaining > 0 {
                *remaining -= 1;
                return Err((self.error)());
            }
            Ok(format!("content of {id}"))
        }
    }

    fn transient() -> SourceError {
        SourceError::command_failed("sf apex get log", 1, "ECONNRESET")
    }

    fn permanent() -> SourceError {
        SourceError::not_found("07L000000000001")
    }

    fn downloader(source: Arc<Flaky>, attempts: u32) -> BackoffDownloader {
        BackoffDownloader::new(
            source,
            RetryPolicy::new(attempts, Duration::from_millis(1), Duration::ZERO),
            Arc::new(TracingObserver),
        )
    }

    #[test]
    fn test_sentinel_payload_format() {
        assert_eq!(
            sentinel_payload("X1", 3, "boom", None),
            "ERROR: Unable to retrieve log X1 after 3 attempt(s): boom"
        );
        assert_eq!(
            sentinel_payload("X1", 1, "boom", Some(42)),
            "ERROR: Unable to retrieve log X1 after 1 attempt(s): boom (size: 42 bytes)"
        );
    }

    #[test]
    fn test_is_sentinel() {
        assert!(is_sentinel(&sentinel_payload("X1", 2, "boom", Some(1))));
        assert!(!is_sentinel("12:00:00.0 (1)|USER_DEBUG|hello"));
        assert!(!is_sentinel(""));
    }

    #[tokio::test]
    async fn test_download_succeeds_after_transient_failures() {
        let source = Arc::new(Flaky::new("A1", 2, transient));
        let mut failed = false;
        let content = downloader(Arc::clone(&source), 5)
            .download("A1", None, |_| failed = true)
            .await;
        assert_eq!(content, "content of A1");
        assert_eq!(source.calls(), 3);
        assert!(!failed);
    }

    #[tokio::test]
    async fn test_download_exhausts_attempts() {
        let source = Arc::new(Flaky::new("A1", 100, transient));
        let mut reason = None;
        let content = downloader(Arc::clone(&source), 3)
            .download("A1", Some(10), |r| reason = Some(r.to_string()))
            .await;
        assert!(is_sentinel(&content));
        assert!(content.contains("after 3 attempt(s)"));
        assert!(content.ends_with("(size: 10 bytes)"));
        assert_eq!(source.calls(), 3);
        assert!(reason.unwrap().contains("ECONNRESET"));
    }

    #[tokio::test]
    async fn test_download_stops_on_permanent_failure() {
        let source = Arc::new(Flaky::new("A1", 100, permanent));
        let mut calls = 0;
        let content = downloader(Arc::clone(&source), 10)
            .download("A1", None, |_| calls += 1)
            .await;
        assert!(content.contains("after 1 attempt(s)"));
        assert_eq!(source.calls(), 1);
        assert_eq!(calls, 1);
    }
}
