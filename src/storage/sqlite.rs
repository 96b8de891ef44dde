//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::output::CrawlSummary;
use crate::state::JobState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::JobRecord;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const JOB_COLUMNS: &str = "id, config, config_hash, state, attempts, result, error, \
     created_at, updated_at, heartbeat_at, available_at, stalled_count";

/// SQLite job store backend
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Creates a new SqliteJobStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteJobStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_jobs(&self, sql: &str, param: &dyn rusqlite::ToSql) -> StorageResult<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([param], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(JobRow::into_record).collect()
    }

    /// Interprets the row count of a state-guarded update
    ///
    /// No change means the job either does not exist or was not in the
    /// expected state; only the former is an error.
    fn transitioned(&self, id: &str, changed: usize) -> StorageResult<bool> {
        if changed > 0 {
            return Ok(true);
        }
        let exists = self
            .conn
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StorageError::JobNotFound(id.to_string()))
        }
    }
}

/// Raw column values of a `jobs` row before JSON decoding
struct JobRow {
    id: String,
    config: String,
    config_hash: String,
    state: String,
    attempts: u32,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
    heartbeat_at: Option<i64>,
    available_at: i64,
    stalled_count: u32,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            config: row.get(1)?,
            config_hash: row.get(2)?,
            state: row.get(3)?,
            attempts: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            heartbeat_at: row.get(9)?,
            available_at: row.get(10)?,
            stalled_count: row.get(11)?,
        })
    }

    fn into_record(self) -> StorageResult<JobRecord> {
        let state = JobState::from_db_string(&self.state).ok_or_else(|| {
            StorageError::Database(format!("job {} has unknown state '{}'", self.id, self.state))
        })?;
        let result = match self.result {
            Some(json) => Some(serde_json::from_str::<CrawlSummary>(&json)?),
            None => None,
        };

        Ok(JobRecord {
            config: serde_json::from_str(&self.config)?,
            id: self.id,
            config_hash: self.config_hash,
            state,
            attempts: self.attempts,
            result,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            heartbeat_at: self.heartbeat_at,
            available_at: self.available_at,
            stalled_count: self.stalled_count,
        })
    }
}

impl JobStore for SqliteJobStore {
    // ===== Job Lifecycle =====

    fn insert_job(&mut self, job: &JobRecord) -> StorageResult<()> {
        let config = serde_json::to_string(&job.config)?;
        let result = job.result.as_ref().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO jobs (id, config, config_hash, state, attempts, result, error,
                created_at, updated_at, heartbeat_at, available_at, stalled_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                config,
                job.config_hash,
                job.state.to_db_string(),
                job.attempts,
                result,
                job.error,
                job.created_at,
                job.updated_at,
                job.heartbeat_at,
                job.available_at,
                job.stalled_count,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> StorageResult<JobRecord> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], JobRow::from_row)
            .optional()?
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;
        row.into_record()
    }

    fn claim_job(&mut self, id: &str, now_ms: i64) -> StorageResult<Option<JobRecord>> {
        let changed = self.conn.execute(
            "UPDATE jobs
             SET state = ?1, attempts = attempts + 1, heartbeat_at = ?2, updated_at = ?3
             WHERE id = ?4 AND state = ?5 AND available_at <= ?2",
            params![
                JobState::Active.to_db_string(),
                now_ms,
                Utc::now().to_rfc3339(),
                id,
                JobState::Waiting.to_db_string(),
            ],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_job(id).map(Some)
    }

    fn record_heartbeat(&mut self, id: &str, now_ms: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET heartbeat_at = ?1 WHERE id = ?2 AND state = ?3",
            params![now_ms, id, JobState::Active.to_db_string()],
        )?;
        Ok(())
    }

    fn complete_job(&mut self, id: &str, summary: &CrawlSummary) -> StorageResult<bool> {
        let result = serde_json::to_string(summary)?;
        let changed = self.conn.execute(
            "UPDATE jobs
             SET state = ?1, result = ?2, error = NULL, heartbeat_at = NULL, updated_at = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                JobState::Completed.to_db_string(),
                result,
                Utc::now().to_rfc3339(),
                id,
                JobState::Active.to_db_string(),
            ],
        )?;
        self.transitioned(id, changed)
    }

    fn schedule_retry(&mut self, id: &str, error: &str, available_at_ms: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs
             SET state = ?1, error = ?2, available_at = ?3, heartbeat_at = NULL, updated_at = ?4
             WHERE id = ?5 AND state = ?6",
            params![
                JobState::Waiting.to_db_string(),
                error,
                available_at_ms,
                Utc::now().to_rfc3339(),
                id,
                JobState::Active.to_db_string(),
            ],
        )?;
        self.transitioned(id, changed)
    }

    fn fail_job(&mut self, id: &str, from: JobState, error: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs
             SET state = ?1, error = ?2, heartbeat_at = NULL, updated_at = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                JobState::Failed.to_db_string(),
                error,
                Utc::now().to_rfc3339(),
                id,
                from.to_db_string(),
            ],
        )?;
        self.transitioned(id, changed)
    }

    fn requeue_stalled(&mut self, id: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs
             SET state = ?1,
                 attempts = MAX(attempts - 1, 0),
                 stalled_count = stalled_count + 1,
                 heartbeat_at = NULL,
                 available_at = 0,
                 updated_at = ?2
             WHERE id = ?3 AND state = ?4",
            params![
                JobState::Waiting.to_db_string(),
                Utc::now().to_rfc3339(),
                id,
                JobState::Active.to_db_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_job(&mut self, id: &str) -> StorageResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    // ===== Queries =====

    fn list_jobs_by_state(&self, state: JobState) -> StorageResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE state = ?1 ORDER BY created_at, rowid",
            JOB_COLUMNS
        );
        self.query_jobs(&sql, &state.to_db_string())
    }

    fn list_stalled_jobs(&self, heartbeat_before_ms: i64) -> StorageResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs
             WHERE state = 'active' AND heartbeat_at IS NOT NULL AND heartbeat_at < ?1
             ORDER BY heartbeat_at",
            JOB_COLUMNS
        );
        self.query_jobs(&sql, &heartbeat_before_ms)
    }

    fn count_jobs_by_state(&self, state: JobState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;

    fn create_test_config() -> CrawlConfig {
        CrawlConfig {
            start_urls: vec!["https://shop.example/".to_string()],
            product_card_selector: ".card".to_string(),
            ..Default::default()
        }
    }

    fn create_test_job(id: &str) -> JobRecord {
        JobRecord::new(id, create_test_config(), "hash")
    }

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get_job() {
        let mut store = create_test_store();
        let job = create_test_job("job-1");
        store.insert_job(&job).unwrap();

        let loaded = store.get_job("job-1").unwrap();
        assert_eq!(loaded, job);
    }

    #[test]
    fn test_get_missing_job() {
        let store = create_test_store();
        let err = store.get_job("nope").unwrap_err();
        assert!(matches!(err, StorageError::JobNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_claim_counts_attempt() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();

        let claimed = store.claim_job("job-1", 1_000).unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.heartbeat_at, Some(1_000));

        // Already active
        assert!(store.claim_job("job-1", 2_000).unwrap().is_none());
    }

    #[test]
    fn test_claim_respects_backoff() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", 1_000).unwrap().unwrap();
        store.schedule_retry("job-1", "boom", 5_000).unwrap();

        assert!(store.claim_job("job-1", 4_999).unwrap().is_none());
        let job = store.claim_job("job-1", 5_000).unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_complete_job_stores_summary() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", 0).unwrap();

        let summary = CrawlSummary {
            crawl_id: "crawl-1".to_string(),
            pages_processed: 4,
            products_persisted: 3,
            pages_fetched: 5,
            urls_abandoned: 0,
        };
        assert!(store.complete_job("job-1", &summary).unwrap());

        let job = store.get_job("job-1").unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(summary));
        assert!(job.heartbeat_at.is_none());
    }

    #[test]
    fn test_fail_job() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", 0).unwrap();
        assert!(store.fail_job("job-1", JobState::Active, "config error").unwrap());

        let job = store.get_job("job-1").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("config error"));
        assert!(matches!(
            store.fail_job("missing", JobState::Active, "x"),
            Err(StorageError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_terminal_state_is_not_overwritten() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", 0).unwrap();

        // Cancelling a waiting job misses once a worker has claimed it
        assert!(!store.fail_job("job-1", JobState::Waiting, "cancelled").unwrap());
        assert_eq!(store.get_job("job-1").unwrap().state, JobState::Active);

        assert!(store.fail_job("job-1", JobState::Active, "cancelled").unwrap());
        assert!(!store.complete_job("job-1", &CrawlSummary::default()).unwrap());
        assert!(!store.schedule_retry("job-1", "boom", 0).unwrap());

        let job = store.get_job("job-1").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_only_active_jobs_complete() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();

        assert!(!store.complete_job("job-1", &CrawlSummary::default()).unwrap());
        assert_eq!(store.get_job("job-1").unwrap().state, JobState::Waiting);
        assert!(matches!(
            store.complete_job("missing", &CrawlSummary::default()),
            Err(StorageError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_stalled_jobs_are_requeued() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.insert_job(&create_test_job("job-2")).unwrap();
        store.claim_job("job-1", 1_000).unwrap();
        store.claim_job("job-2", 1_000).unwrap();
        store.record_heartbeat("job-2", 9_000).unwrap();

        let stalled = store.list_stalled_jobs(5_000).unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, "job-1");

        assert!(store.requeue_stalled("job-1").unwrap());
        let job = store.get_job("job-1").unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.stalled_count, 1);
        assert_eq!(job.attempts, 0);

        // Only active jobs can stall
        assert!(!store.requeue_stalled("job-1").unwrap());
    }

    #[test]
    fn test_list_and_count_by_state() {
        let mut store = create_test_store();
        for id in ["a", "b", "c"] {
            store.insert_job(&create_test_job(id)).unwrap();
        }
        store.claim_job("b", 0).unwrap();

        assert_eq!(store.count_jobs_by_state(JobState::Waiting).unwrap(), 2);
        assert_eq!(store.count_jobs_by_state(JobState::Active).unwrap(), 1);

        let waiting: Vec<String> = store
            .list_jobs_by_state(JobState::Waiting)
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(waiting, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_delete_job() {
        let mut store = create_test_store();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.delete_job("job-1").unwrap();

        assert!(matches!(
            store.get_job("job-1"),
            Err(StorageError::JobNotFound(_))
        ));
        assert!(store.delete_job("job-1").is_err());
    }

    #[test]
    fn test_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        {
            let mut store = SqliteJobStore::new(&path).unwrap();
            store.insert_job(&create_test_job("job-1")).unwrap();
        }

        let store = SqliteJobStore::new(&path).unwrap();
        assert_eq!(store.get_job("job-1").unwrap().config, create_test_config());
    }
}
