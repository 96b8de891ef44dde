//! Output module for crawl artifacts and summaries
//!
//! This module handles:
//! - The artifact sink product pages are persisted through
//! - An `object_store` backed sink (in-memory or local directory)
//! - The summary a finished crawl reports

mod object_sink;
mod summary;
mod traits;

pub use object_sink::{artifact_key, ObjectStoreSink, HTML_CONTENT_TYPE};
pub use summary::CrawlSummary;
pub use traits::{ArtifactSink, SinkError, SinkResult, StoredArtifact};
