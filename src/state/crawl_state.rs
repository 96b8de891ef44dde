/// Per-crawl progress tracking
///
/// The dedup ledger of processed URLs lives in the frontier; this holds the
/// counters and the status the engine reports at the end.
use crate::output::CrawlSummary;
use std::fmt;

/// Status of a single crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlStatus {
    /// Admitting and handling pages
    Running,

    /// Frontier exhausted or ceiling reached
    Completed,

    /// Stopped before completion
    Failed { reason: String },
}

impl CrawlStatus {
    /// Returns true once the crawl has stopped
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Aggregate state of one crawl, mutated only by the engine
#[derive(Debug, Clone)]
pub struct CrawlState {
    crawl_id: String,
    page_count: u64,
    pages_processed: u64,
    products_persisted: u64,
    urls_abandoned: u64,
    status: CrawlStatus,
}

impl CrawlState {
    /// Creates a running crawl with zeroed counters
    pub fn new(crawl_id: impl Into<String>) -> Self {
        Self {
            crawl_id: crawl_id.into(),
            page_count: 0,
            pages_processed: 0,
            products_persisted: 0,
            urls_abandoned: 0,
            status: CrawlStatus::Running,
        }
    }

    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    /// Number of fetches charged to the crawl
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn status(&self) -> &CrawlStatus {
        &self.status
    }

    /// Records the fetches charged against the crawl's ceiling
    pub fn record_fetches(&mut self, fetches: u64) {
        self.page_count = fetches;
    }

    /// Counts a listing or product page that was fetched and handled
    pub fn record_processed(&mut self) {
        self.pages_processed += 1;
    }

    /// Counts a product page handed to the artifact sink successfully
    pub fn record_persisted(&mut self) {
        self.products_persisted += 1;
    }

    /// Counts a URL whose handler gave up on it
    pub fn record_abandoned(&mut self) {
        self.urls_abandoned += 1;
    }

    /// Moves the crawl to a terminal status
    ///
    /// The first terminal status wins.
    pub fn finish(&mut self, status: CrawlStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Builds the summary reported to the job queue
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            crawl_id: self.crawl_id.clone(),
            pages_processed: self.pages_processed,
            products_persisted: self.products_persisted,
            pages_fetched: self.page_count,
            urls_abandoned: self.urls_abandoned,
        }
    }
}
