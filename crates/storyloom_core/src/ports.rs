//! crates/storyloom_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the story engine's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! queue to be independent of specific external implementations like LLM
//! providers or on-disk stores.

use crate::domain::{ChapterResult, JournalEntry, StoryMetadata};
use async_trait::async_trait;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., LLM
/// APIs, the filesystem) into the categories the queue cares about.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Turns free-form journal text into structured story metadata.
///
/// Implementations must be deterministic for the on-device variant and must
/// never fail on empty or malformed text: absence of signal is represented by
/// empty fields, not an error. The local and remote variants are
/// interchangeable from the caller's point of view.
#[async_trait]
pub trait MetadataExtractionService: Send + Sync {
    async fn extract(&self, text: &str) -> PortResult<StoryMetadata>;
}

/// Produces a story chapter from extracted metadata and narrative context.
#[async_trait]
pub trait ChapterGenerationService: Send + Sync {
    /// `previous_arcs` is the chapter text of the most recent arcs,
    /// most-recent-first; it is passed through as context and never parsed.
    async fn generate_chapter(
        &self,
        metadata: &StoryMetadata,
        user_id: &str,
        genre: &str,
        previous_arcs: &[String],
    ) -> PortResult<ChapterResult>;
}

/// Persists generated chapters as story arcs for narrative continuity.
#[async_trait]
pub trait StoryArcStore: Send + Sync {
    /// Appends a new arc. A failure here is reported but does not undo a
    /// successful chapter generation; only future continuity degrades.
    async fn save_arc(&self, chapter: &ChapterResult, themes: &[String]) -> PortResult<()>;

    /// Returns up to `limit` most-recently-created arcs' chapter text,
    /// most-recent-first. Insufficient history is not an error.
    async fn recent_arcs(&self, limit: usize) -> PortResult<Vec<String>>;
}

/// Read-only lookup into the journal owned by the surrounding application.
#[async_trait]
pub trait JournalEntryStore: Send + Sync {
    async fn get_entry(&self, id: &str) -> PortResult<Option<JournalEntry>>;
}
