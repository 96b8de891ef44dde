//! Storage traits and error types
//!
//! This module defines the trait interface for job store backends and
//! associated error types.

use crate::output::CrawlSummary;
use crate::state::JobState;
use crate::storage::JobRecord;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for job store implementations
///
/// Job records must survive process restarts so that status polling works
/// after a worker crash. Times named `*_ms` are epoch milliseconds.
pub trait JobStore: Send {
    // ===== Job Lifecycle =====

    /// Inserts a newly submitted job
    fn insert_job(&mut self, job: &JobRecord) -> StorageResult<()>;

    /// Gets a job by ID
    fn get_job(&self, id: &str) -> StorageResult<JobRecord>;

    /// Moves a waiting job to active and counts the attempt
    ///
    /// # Arguments
    ///
    /// * `id` - The job ID
    /// * `now_ms` - Current time; jobs backing off until later are skipped
    ///
    /// # Returns
    ///
    /// The claimed job, or `None` if it was not waiting or not yet due
    fn claim_job(&mut self, id: &str, now_ms: i64) -> StorageResult<Option<JobRecord>>;

    /// Renews the heartbeat of an active job
    fn record_heartbeat(&mut self, id: &str, now_ms: i64) -> StorageResult<()>;

    /// Marks an active job completed with its summary
    ///
    /// # Returns
    ///
    /// `false` if the job exists but is no longer active, in which case it
    /// is left untouched
    fn complete_job(&mut self, id: &str, summary: &CrawlSummary) -> StorageResult<bool>;

    /// Returns a failed attempt of an active job to waiting until `available_at_ms`
    ///
    /// # Returns
    ///
    /// `false` if the job exists but is no longer active
    fn schedule_retry(&mut self, id: &str, error: &str, available_at_ms: i64) -> StorageResult<bool>;

    /// Marks a job that is in state `from` failed, keeping `error` as its result
    ///
    /// # Returns
    ///
    /// `false` if the job exists but has left `from`
    fn fail_job(&mut self, id: &str, from: JobState, error: &str) -> StorageResult<bool>;

    /// Returns a stalled active job to waiting
    ///
    /// The stalled run does not count as an attempt, but it is added to the
    /// job's stall count.
    ///
    /// # Returns
    ///
    /// `true` if the job was active and has been requeued
    fn requeue_stalled(&mut self, id: &str) -> StorageResult<bool>;

    /// Deletes a job
    fn delete_job(&mut self, id: &str) -> StorageResult<()>;

    // ===== Queries =====

    /// Gets all jobs in a state, oldest first
    fn list_jobs_by_state(&self, state: JobState) -> StorageResult<Vec<JobRecord>>;

    /// Gets active jobs whose heartbeat is older than `heartbeat_before_ms`
    fn list_stalled_jobs(&self, heartbeat_before_ms: i64) -> StorageResult<Vec<JobRecord>>;

    /// Counts jobs in a state
    fn count_jobs_by_state(&self, state: JobState) -> StorageResult<u64>;
}
