//! Log Exporter Core Library
//!
//! This library provides the core functionality for the log exporter, which
//! pulls every debug log out of a hosted platform org through its CLI and
//! lays them out on disk with a failure ledger and a run summary.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`artifact`] - Log descriptors, enriched metadata, and summary rows
//! - [`source`] - Remote log channel trait and its CLI-backed implementation
//! - [`export`] - Batched export engine with retries and a failure ledger
//! - [`report`] - Rendering of the final run summary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod export;
pub mod report;
pub mod source;

// Re-export commonly used types
pub use artifact::{ArtifactDescriptor, EnrichedMetadata, ResolvedFields, SummaryRow};
pub use export::{
    DEFAULT_BATCH_SIZE, EngineError, ExportConfig, ExportEngine, ExportEvent, ExportObserver,
    FailureLedger, FailureType, RateLimiter, RetryDecision, RetryPolicy, RunReport, RunStats,
    classify_error,
};
pub use report::{JsonReportRenderer, ReportRenderer};
pub use source::{CommandLimits, CommandLogSource, LogSource, SourceError};
