//! State module for tracking crawl and job progress
//!
//! # Components
//!
//! - `CrawlState`: Counters and status of one running crawl
//! - `CrawlStatus`: Running, completed, or failed with a reason
//! - `JobState`: Lifecycle of a queued crawl job (waiting, active, completed, failed)

mod crawl_state;
mod job_state;

// Re-export main types
pub use crawl_state::{CrawlState, CrawlStatus};
pub use job_state::JobState;
