//! Durable crawl job queue
//!
//! Crawl configs are submitted as jobs, persisted in a [`JobStore`] and run
//! by a pool of job workers, each job on its own crawl engine run. Failed
//! attempts are retried with exponential backoff, and jobs whose heartbeat
//! goes quiet are recovered by the stall monitor.
//!
//! # Example
//!
//! ```no_run
//! use shelf_crawl::config::{EngineSettings, QueueSettings};
//! use shelf_crawl::crawler::HttpPageFetcher;
//! use shelf_crawl::output::ObjectStoreSink;
//! use shelf_crawl::queue::JobQueue;
//! use shelf_crawl::storage::SqliteJobStore;
//! use shelf_crawl::CrawlConfig;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! # async fn demo(config: CrawlConfig) -> anyhow::Result<()> {
//! let store = SqliteJobStore::open_in_memory()?;
//! let fetcher = HttpPageFetcher::new(&Default::default(), Duration::from_secs(10))?;
//! let queue = JobQueue::new(
//!     Arc::new(Mutex::new(store)),
//!     Arc::new(fetcher),
//!     Arc::new(ObjectStoreSink::in_memory()),
//!     QueueSettings::default(),
//!     EngineSettings::default(),
//! );
//! queue.start()?;
//!
//! let job_id = queue.submit(&config)?;
//! let result = queue.wait_for(&job_id, Duration::from_secs(600)).await?;
//! println!("{:?}", result);
//! # Ok(())
//! # }
//! ```

mod backoff;
mod worker;

pub use backoff::backoff_delay;

use crate::config::{
    compute_config_hash, validate_and_apply_defaults, CrawlConfig, EngineSettings, QueueSettings,
};
use crate::crawler::{CancelToken, CrawlEngine, PageFetcher, CANCELLED_REASON};
use crate::output::{ArtifactSink, CrawlSummary};
use crate::state::JobState;
use crate::storage::{JobRecord, JobStore, StorageError, StorageResult};
use crate::ConfigError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Job store shared between the queue handle and its workers
pub type SharedJobStore = Arc<Mutex<dyn JobStore>>;

/// How often [`JobQueue::wait_for`] polls the job store
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Errors returned by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid crawl config: {0}")]
    Config(#[from] ConfigError),

    #[error("Job store error: {0}")]
    Storage(StorageError),

    #[error("Job {id} is still {state}")]
    NotTerminal { id: String, state: JobState },

    #[error("Timed out waiting for job {0}")]
    WaitTimeout(String),

    #[error("Job queue is already started")]
    AlreadyStarted,
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::JobNotFound(id) => QueueError::NotFound(id),
            other => QueueError::Storage(other),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Outcome of a job as seen by a poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Not finished yet
    Pending(JobState),
    Completed(CrawlSummary),
    /// Failed for good, with the last error
    Failed(String),
}

impl From<&JobRecord> for JobResult {
    fn from(job: &JobRecord) -> Self {
        match job.state {
            JobState::Completed => JobResult::Completed(job.result.clone().unwrap_or_default()),
            JobState::Failed => JobResult::Failed(
                job.error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            state => JobResult::Pending(state),
        }
    }
}

/// State shared by the queue handle, its job workers and the stall monitor
pub(crate) struct QueueShared {
    store: SharedJobStore,
    engine: CrawlEngine,
    settings: QueueSettings,
    dispatch_tx: mpsc::UnboundedSender<String>,
    dispatch_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    /// Cancel tokens of jobs running in this process
    running: Mutex<HashMap<String, CancelToken>>,
}

impl QueueShared {
    /// Runs `op` with the job store locked
    ///
    /// The lock is never held across an await point.
    fn with_store<T>(
        &self,
        op: impl FnOnce(&mut dyn JobStore) -> StorageResult<T>,
    ) -> QueueResult<T> {
        let mut store = self.store.lock().map_err(|_| {
            QueueError::Storage(StorageError::Database("job store lock poisoned".to_string()))
        })?;
        Ok(op(&mut *store)?)
    }

    /// Hands a job id to the next free worker
    fn dispatch(&self, job_id: &str) {
        if self.dispatch_tx.send(job_id.to_string()).is_err() {
            tracing::warn!("Dispatch channel closed; job {} stays queued", job_id);
        }
    }

    /// Dispatches a job once `delay` has passed
    fn dispatch_after(self: &Arc<Self>, job_id: String, delay: Duration) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.dispatch(&job_id);
        });
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, CancelToken>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a job as running here; false if it already is
    fn register_running(&self, job_id: &str, cancel: CancelToken) -> bool {
        let mut running = self.running();
        if running.contains_key(job_id) {
            return false;
        }
        running.insert(job_id.to_string(), cancel);
        true
    }

    fn unregister_running(&self, job_id: &str) {
        self.running().remove(job_id);
    }

    fn is_running(&self, job_id: &str) -> bool {
        self.running().contains_key(job_id)
    }

    fn cancel_running(&self, job_id: &str) -> bool {
        match self.running().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.settings.heartbeat_interval_ms.max(1))
    }

    fn stalled_interval(&self) -> Duration {
        Duration::from_millis(self.settings.stalled_interval_ms.max(1))
    }
}

/// Handle to a durable job queue
///
/// Cloning the handle shares the same queue.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<QueueShared>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobQueue {
    /// Creates a queue over a job store
    ///
    /// Nothing runs until [`JobQueue::start`] is called; jobs submitted
    /// before that wait in the store.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable job records
    /// * `fetcher` - Page fetcher handed to every crawl
    /// * `sink` - Artifact sink handed to every crawl
    /// * `settings` - Concurrency, retry and stall settings
    /// * `engine_settings` - Settings for each job's crawl engine
    pub fn new(
        store: SharedJobStore,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn ArtifactSink>,
        settings: QueueSettings,
        engine_settings: EngineSettings,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let shared = QueueShared {
            store,
            engine: CrawlEngine::new(fetcher, sink, engine_settings),
            settings,
            dispatch_tx,
            dispatch_rx: tokio::sync::Mutex::new(dispatch_rx),
            running: Mutex::new(HashMap::new()),
        };

        Self {
            shared: Arc::new(shared),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts the job workers and the stall monitor
    ///
    /// Jobs left waiting by an earlier process are dispatched again, and jobs
    /// it left active are treated as stalled.
    pub fn start(&self) -> QueueResult<()> {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks.is_empty() {
            return Err(QueueError::AlreadyStarted);
        }

        let recovered = worker::recover_persisted(&self.shared)?;
        if recovered > 0 {
            tracing::info!("Recovered {} persisted jobs", recovered);
        }

        let concurrency = self.shared.settings.concurrency.max(1);
        for worker_id in 0..concurrency {
            let shared = Arc::clone(&self.shared);
            tasks.push(tokio::spawn(worker::run_worker(shared, worker_id)));
        }
        tasks.push(tokio::spawn(worker::run_stall_monitor(Arc::clone(
            &self.shared,
        ))));

        tracing::info!("Job queue started with {} workers", concurrency);
        Ok(())
    }

    /// Stops the workers and cancels crawls running in this process
    ///
    /// Cancelled crawls stay `Active` in the store and are recovered as
    /// stalled on the next start.
    pub fn shutdown(&self) {
        for token in self.shared.running().values() {
            token.cancel();
        }
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Job queue stopped");
    }

    /// Submits a crawl config as a new job
    ///
    /// The config is validated and the job persisted as `Waiting` before it
    /// is handed to a worker; the crawl never runs on the caller's task.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new job ID
    /// * `Err(QueueError::Config)` - The config was rejected
    pub fn submit(&self, config: &CrawlConfig) -> QueueResult<String> {
        let config = validate_and_apply_defaults(config)?;
        let config_hash = compute_config_hash(&config)?;
        let job = JobRecord::new(Uuid::new_v4().to_string(), config, config_hash);

        self.shared.with_store(|store| store.insert_job(&job))?;
        tracing::info!(
            "Submitted job {} with {} start URLs",
            job.id,
            job.config.start_urls.len()
        );

        self.shared.dispatch(&job.id);
        Ok(job.id)
    }

    /// Gets the state of a job
    pub fn status(&self, job_id: &str) -> QueueResult<JobState> {
        Ok(self.job(job_id)?.state)
    }

    /// Gets the outcome of a job
    pub fn result(&self, job_id: &str) -> QueueResult<JobResult> {
        Ok(JobResult::from(&self.job(job_id)?))
    }

    /// Gets the full record of a job
    pub fn job(&self, job_id: &str) -> QueueResult<JobRecord> {
        self.shared.with_store(|store| store.get_job(job_id))
    }

    /// Deletes a finished job
    pub fn purge(&self, job_id: &str) -> QueueResult<()> {
        let state = self.status(job_id)?;
        if !state.is_terminal() {
            return Err(QueueError::NotTerminal {
                id: job_id.to_string(),
                state,
            });
        }
        self.shared.with_store(|store| store.delete_job(job_id))?;
        tracing::debug!("Purged job {}", job_id);
        Ok(())
    }

    /// Cancels a job
    ///
    /// A waiting job fails immediately. A running job stops admitting pages
    /// and fails once its in-flight pages finish. A job claimed by a worker
    /// between the status read and the update is cancelled as running.
    ///
    /// # Returns
    ///
    /// `true` if the job was waiting or running, `false` if already finished
    pub fn cancel(&self, job_id: &str) -> QueueResult<bool> {
        if self.status(job_id)? == JobState::Waiting
            && self
                .shared
                .with_store(|store| store.fail_job(job_id, JobState::Waiting, CANCELLED_REASON))?
        {
            tracing::info!("Cancelled waiting job {}", job_id);
            return Ok(true);
        }

        if self.shared.cancel_running(job_id) {
            tracing::info!("Cancelling running job {}", job_id);
            return Ok(true);
        }

        let state = self.status(job_id)?;
        if state == JobState::Active {
            tracing::warn!("Job {} is active but not running in this process", job_id);
        }
        Ok(false)
    }

    /// Waits until a job is completed or failed
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job to wait for
    /// * `timeout` - How long to wait before giving up
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> QueueResult<JobResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(job_id)?;
            if job.state.is_terminal() {
                return Ok(JobResult::from(&job));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(QueueError::WaitTimeout(job_id.to_string()));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
