//! Artifact sink trait and types
//!
//! Product pages leave the crawler through an [`ArtifactSink`]. The engine
//! only sees this trait, so tests substitute their own sinks.

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by an artifact sink
///
/// `Rejected` means the backend refused this artifact; `Unavailable` means
/// the backend could not be reached or authenticated against. Neither aborts
/// a crawl.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Artifact '{key}' rejected: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Artifact store unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Returns true if the failure concerns the backend rather than the artifact
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Metadata returned after an artifact is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub key: String,
    pub size: usize,
    pub etag: Option<String>,
}

/// Durable storage for fetched product pages
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores `content` under `key`
    ///
    /// # Arguments
    ///
    /// * `key` - Generated artifact key
    /// * `content` - Raw page content
    /// * `content_type` - MIME type of the content
    async fn persist(&self, key: &str, content: &str, content_type: &str)
        -> SinkResult<StoredArtifact>;
}
