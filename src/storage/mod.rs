//! Storage module for persisting crawl jobs
//!
//! This module handles all database operations for the job queue, including:
//! - SQLite database initialization and schema management
//! - Job state transitions (claim, heartbeat, retry, completion, failure)
//! - Stall detection queries

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};

use crate::config::CrawlConfig;
use crate::output::CrawlSummary;
use crate::state::JobState;

use std::path::Path;

/// Initializes or opens a job database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteJobStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteJobStore> {
    SqliteJobStore::new(path)
}

/// Represents a crawl job in the database
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub config: CrawlConfig,
    pub config_hash: String,
    pub state: JobState,
    /// Attempts started so far, the first run included
    pub attempts: u32,
    pub result: Option<CrawlSummary>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Epoch milliseconds of the last heartbeat while active
    pub heartbeat_at: Option<i64>,
    /// Epoch milliseconds before which the job is not dispatched
    pub available_at: i64,
    pub stalled_count: u32,
}

impl JobRecord {
    /// Creates a waiting job for a validated config
    pub fn new(id: impl Into<String>, config: CrawlConfig, config_hash: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            config,
            config_hash: config_hash.into(),
            state: JobState::Waiting,
            attempts: 0,
            result: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            heartbeat_at: None,
            available_at: 0,
            stalled_count: 0,
        }
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
