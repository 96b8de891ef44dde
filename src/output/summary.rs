//! Terminal crawl summary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a finished crawl, stored with the job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub crawl_id: String,

    /// Listing and product pages fetched and handled, seeds excluded
    pub pages_processed: u64,

    /// Product pages stored by the artifact sink
    pub products_persisted: u64,

    /// Every fetch operation, seeds and pagination hops included
    #[serde(default)]
    pub pages_fetched: u64,

    /// URLs given up on by their handler
    #[serde(default)]
    pub urls_abandoned: u64,
}

impl CrawlSummary {
    /// Returns the share of processed pages that ended in a stored product
    pub fn persist_rate(&self) -> f64 {
        if self.pages_processed == 0 {
            return 0.0;
        }
        (self.products_persisted as f64 / self.pages_processed as f64) * 100.0
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Crawl {}", self.crawl_id)?;
        writeln!(f, "  Pages fetched:      {}", self.pages_fetched)?;
        writeln!(f, "  Pages processed:    {}", self.pages_processed)?;
        writeln!(f, "  Products persisted: {} ({:.1}%)", self.products_persisted, self.persist_rate())?;
        write!(f, "  URLs abandoned:     {}", self.urls_abandoned)
    }
}
