//! Shelf-Crawl: an e-commerce catalogue crawler
//!
//! This crate walks listing pages of online shops, discovers the product pages
//! beneath them and hands each product page to an artifact sink for downstream
//! extraction. Crawls run as durable, retryable jobs.

pub mod config;
pub mod crawler;
pub mod output;
pub mod queue;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Errors that end a crawl
///
/// Per-URL problems never surface here; they are absorbed by the router
/// (see [`crawler::HandlerError`]). Only configuration problems, cancellation
/// and failures escaping the worker loop reach the caller.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Crawl worker failed: {0}")]
    Fatal(String),
}

impl CrawlError {
    /// Returns true if running the same crawl again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse crawl config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crawl configuration is empty")]
    Empty,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{CrawlConfig, Settings};
pub use crawler::{CancelToken, CrawlEngine, CrawlHandle};
pub use output::{ArtifactSink, CrawlSummary};
pub use queue::{JobQueue, JobResult};
pub use state::{CrawlStatus, JobState};
pub use url::{normalize_url, Classification, PatternMatcher};
