//! Retry policy with size- and error-aware linear backoff.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying retrieval errors and determining retry behavior.
//!
//! # Overview
//!
//! When a retrieval fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::ResourceExhausted`] - Out of buffers, file handles or memory
//! - [`FailureType::Transient`] - Connection resets, timeouts, generic command failures
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//!
//! # Delay Calculation
//!
//! ```text
//! delay = base_delay * attempt * size_multiplier * resource_multiplier + jitter
//! ```
//!
//! `size_multiplier` is 2 when the size hint exceeds 5 MB, `resource_multiplier`
//! is 3 for [`FailureType::ResourceExhausted`]. Jitter is uniform in
//! `0..=max_jitter`.
//!
//! # Example
//!
//! ```
//! use exporter_core::export::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 1, Some(1024)) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::{debug, instrument};

use crate::source::SourceError;

/// Default attempt ceiling (including the first attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum jitter added to each delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Size hints above this many bytes double the delay.
pub const LARGE_SIZE_HINT_BYTES: u64 = 5 * 1024 * 1024;

const SIZE_MULTIPLIER: u32 = 2;
const RESOURCE_MULTIPLIER: u32 = 3;

#[allow(clippy::expect_used)]
static RESOURCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)ENOBUFS|no buffer space|maxBuffer|EMFILE|ENFILE|too many open files|ENOMEM|out of memory",
    )
    .expect("resource exhaustion regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PERMANENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)NamedOrgNotFound|NoOrgFound|no default (?:target )?org|INVALID_SESSION_ID|INVALID_ID_FIELD|entity is deleted",
    )
    .expect("permanent failure regex is valid") // Static pattern, safe to panic
});

/// Classification of retrieval failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The transport ran out of buffers, file handles, or memory.
    ///
    /// Retried with a tripled delay to let the pressure subside.
    ResourceExhausted,

    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, timeout, generic command failure.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: missing CLI binary, malformed id, unknown org.
    Permanent,
}

/// Decision on whether to retry a failed retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior.
///
/// # Default Values
///
/// - `max_attempts`: 10
/// - `base_delay`: 1 second
/// - `max_jitter`: 1 second
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay unit multiplied by the attempt number.
    base_delay: Duration,

    /// Upper bound of the random jitter.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (clamped to >= 1)
    /// * `base_delay` - Delay unit
    /// * `max_jitter` - Upper bound of random jitter (zero disables jitter)
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry a failed retrieval.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    /// * `size_hint` - Best known artifact size in bytes
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        size_hint: Option<u64>,
    ) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_before_retry(attempt, size_hint, failure_type);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay before the retry that follows failed `attempt`, without jitter.
    ///
    /// Formula: `base_delay * attempt * size_multiplier * resource_multiplier`
    #[must_use]
    pub fn base_delay_for(
        &self,
        attempt: u32,
        size_hint: Option<u64>,
        failure_type: FailureType,
    ) -> Duration {
        let mut factor = attempt.max(1);
        if size_hint.is_some_and(|size| size > LARGE_SIZE_HINT_BYTES) {
            factor = factor.saturating_mul(SIZE_MULTIPLIER);
        }
        if failure_type == FailureType::ResourceExhausted {
            factor = factor.saturating_mul(RESOURCE_MULTIPLIER);
        }
        self.base_delay.saturating_mul(factor)
    }

    fn delay_before_retry(
        &self,
        attempt: u32,
        size_hint: Option<u64>,
        failure_type: FailureType,
    ) -> Duration {
        self.base_delay_for(attempt, size_hint, failure_type) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `max_jitter`.
    ///
    /// Jitter keeps tasks of the same batch from retrying in lockstep.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Classifies a source error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Output cap exceeded | ResourceExhausted |
/// | Message mentions ENOBUFS / EMFILE / out of memory | ResourceExhausted |
/// | Missing binary, bad id, not found, unknown org | Permanent |
/// | Timeout, connection reset, other command failures | Transient |
#[instrument]
pub fn classify_error(error: &SourceError) -> FailureType {
    match error {
        SourceError::OutputTooLarge { .. } => FailureType::ResourceExhausted,

        SourceError::InvalidId { .. } | SourceError::NotFound { .. } => FailureType::Permanent,

        SourceError::Spawn { source, .. } => match source.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                FailureType::Permanent
            }
            _ => classify_message(&source.to_string()),
        },

        SourceError::Timeout { .. } => FailureType::Transient,

        SourceError::CommandFailed { message, .. } => classify_message(message),

        SourceError::Io { source, .. } => classify_message(&source.to_string()),

        SourceError::InvalidResponse { message, .. } => classify_message(message),
    }
}

/// Classifies free-form transport error text.
///
/// Unrecognized text is transient: a generic command failure is worth retrying.
fn classify_message(message: &str) -> FailureType {
    if RESOURCE_PATTERN.is_match(message) {
        FailureType::ResourceExhausted
    } else if PERMANENT_PATTERN.is_match(message) {
        FailureType::Permanent
    } else {
        FailureType::Transient
    }
}
