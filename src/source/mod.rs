//! Remote log channel: listing, metadata enrichment, and content retrieval.
//!
//! - [`LogSource`] - Async trait the export engine drives
//! - [`CommandLogSource`] - Implementation backed by the platform CLI
//! - [`SourceError`] - Errors from any source implementation

mod command;
mod error;
mod record;

pub use command::{
    CommandLimits, CommandLogSource, DEFAULT_CLI_BINARY, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_MAX_OUTPUT_BYTES, is_valid_record_id,
};
pub use error::SourceError;

use async_trait::async_trait;

use crate::artifact::{ArtifactDescriptor, EnrichedMetadata};

/// The external channel logs are exported from.
///
/// Implementations must be cheap to share (`Arc<dyn LogSource>`); the engine
/// calls them from many tasks at once.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Identifier of the org being exported, used for throttling and reports.
    fn org(&self) -> &str;

    /// Returns every log descriptor to export.
    async fn list_descriptors(&self) -> Result<Vec<ArtifactDescriptor>, SourceError>;

    /// Returns detailed metadata for one log, or `None` when the remote has none.
    async fn fetch_metadata(&self, id: &str) -> Result<Option<EnrichedMetadata>, SourceError>;

    /// Returns the raw log body.
    ///
    /// `size_hint` is the best known size in bytes, if any.
    async fn retrieve_content(
        &self,
        id: &str,
        size_hint: Option<u64>,
    ) -> Result<String, SourceError>;
}
