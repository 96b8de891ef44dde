//! Integration tests for the job queue
//!
//! Jobs run against an on-disk SQLite store so that state survives the way
//! it would across a process restart.

use crate::support::{product_links, product_pages, shop_config, MapFetcher, PanickingFetcher};
use async_trait::async_trait;
use shelf_crawl::config::{EngineSettings, QueueSettings};
use shelf_crawl::crawler::{FetchError, PageFetcher, PageHandle};
use shelf_crawl::output::ObjectStoreSink;
use shelf_crawl::queue::{JobQueue, QueueError};
use shelf_crawl::storage::{JobRecord, JobStore, SqliteJobStore};
use shelf_crawl::{CrawlConfig, JobResult, JobState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

/// Short delays so retries and stalls resolve quickly
fn fast_settings() -> QueueSettings {
    QueueSettings {
        concurrency: 2,
        max_attempts: 3,
        backoff_base_ms: 10,
        stalled_interval_ms: 5_000,
        heartbeat_interval_ms: 50,
        max_stalled_count: 3,
    }
}

fn shop_fetcher() -> MapFetcher {
    let mut pages = vec![("https://shop.test/cat".to_string(), product_links(2))];
    pages.extend(product_pages(2));
    MapFetcher::new(&pages)
}

/// Crashes every attempt and remembers when each one started
#[derive(Default)]
struct TimedCrashFetcher {
    attempts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl PageFetcher for TimedCrashFetcher {
    async fn fetch(&self, _url: &Url) -> Result<Box<dyn PageHandle>, FetchError> {
        self.attempts.lock().unwrap().push(Instant::now());
        panic!("renderer crashed");
    }
}

fn create_queue(db_path: &Path, fetcher: Arc<dyn PageFetcher>) -> JobQueue {
    create_queue_with(db_path, fetcher, fast_settings())
}

fn create_queue_with(db_path: &Path, fetcher: Arc<dyn PageFetcher>, settings: QueueSettings) -> JobQueue {
    let store = SqliteJobStore::new(db_path).unwrap();
    JobQueue::new(
        Arc::new(Mutex::new(store)),
        fetcher,
        Arc::new(ObjectStoreSink::in_memory()),
        settings,
        EngineSettings::default(),
    )
}

#[tokio::test]
async fn test_job_completes_with_summary() {
    let dir = tempfile::tempdir().unwrap();
    let queue = create_queue(&dir.path().join("jobs.db"), Arc::new(shop_fetcher()));
    queue.start().unwrap();

    let job_id = queue.submit(&shop_config()).unwrap();
    let result = queue.wait_for(&job_id, WAIT).await.unwrap();

    let JobResult::Completed(summary) = result else {
        panic!("expected completion, got {:?}", result);
    };
    assert_eq!(summary.pages_processed, 2);
    assert_eq!(summary.products_persisted, 2);

    let job = queue.job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.error.is_none());

    queue.purge(&job_id).unwrap();
    assert!(matches!(queue.status(&job_id), Err(QueueError::NotFound(_))));
    queue.shutdown();
}

#[tokio::test]
async fn test_failing_job_exhausts_retries() {
    let dir = tempfile::tempdir().unwrap();
    let queue = create_queue(&dir.path().join("jobs.db"), Arc::new(PanickingFetcher));
    queue.start().unwrap();

    let job_id = queue.submit(&shop_config()).unwrap();
    let result = queue.wait_for(&job_id, WAIT).await.unwrap();

    let JobResult::Failed(error) = result else {
        panic!("expected failure, got {:?}", result);
    };
    assert!(error.contains("Crawl worker failed"));
    assert_eq!(queue.job(&job_id).unwrap().attempts, 3);
    queue.shutdown();
}

#[tokio::test]
async fn test_retries_back_off_exponentially() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(TimedCrashFetcher::default());
    let settings = QueueSettings {
        max_attempts: 4,
        backoff_base_ms: 100,
        ..fast_settings()
    };
    let queue = create_queue_with(&dir.path().join("jobs.db"), fetcher.clone(), settings);
    queue.start().unwrap();

    let job_id = queue.submit(&shop_config()).unwrap();
    let result = queue.wait_for(&job_id, WAIT).await.unwrap();
    assert!(matches!(result, JobResult::Failed(_)));
    assert_eq!(queue.job(&job_id).unwrap().attempts, 4);

    let attempts = fetcher.attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).map(|pair| pair[1] - pair[0]).collect();

    // Nominal gaps are 100ms, 200ms and 400ms
    assert!(gaps[0] >= Duration::from_millis(100), "{:?}", gaps);
    assert!(gaps.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", gaps);
    queue.shutdown();
}

#[tokio::test]
async fn test_config_errors_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");

    // Bypass submit-time validation, as an older release might have
    {
        let mut store = SqliteJobStore::new(&db_path).unwrap();
        let job = JobRecord::new("legacy-job", CrawlConfig::default(), "legacy");
        store.insert_job(&job).unwrap();
    }

    let queue = create_queue(&db_path, Arc::new(shop_fetcher()));
    queue.start().unwrap();

    let result = queue.wait_for("legacy-job", WAIT).await.unwrap();
    let JobResult::Failed(error) = result else {
        panic!("expected failure, got {:?}", result);
    };
    assert!(error.contains("empty"));
    assert_eq!(queue.job("legacy-job").unwrap().attempts, 1);
    queue.shutdown();
}

#[tokio::test]
async fn test_interrupted_job_recovers_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");

    // A previous process claimed the job and died mid-crawl
    {
        let mut store = SqliteJobStore::new(&db_path).unwrap();
        let job = JobRecord::new("orphan", shop_config(), "orphan");
        store.insert_job(&job).unwrap();
        store.claim_job("orphan", 0).unwrap();
    }

    let queue = create_queue(&db_path, Arc::new(shop_fetcher()));
    queue.start().unwrap();

    let result = queue.wait_for("orphan", WAIT).await.unwrap();
    assert!(matches!(result, JobResult::Completed(_)));

    let job = queue.job("orphan").unwrap();
    assert_eq!(job.stalled_count, 1);
    assert_eq!(job.attempts, 1);
    queue.shutdown();
}

#[tokio::test]
async fn test_unknown_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let queue = create_queue(&dir.path().join("jobs.db"), Arc::new(shop_fetcher()));

    assert!(matches!(queue.status("missing"), Err(QueueError::NotFound(_))));
    assert!(matches!(queue.result("missing"), Err(QueueError::NotFound(_))));
    assert!(matches!(
        queue.wait_for("missing", WAIT).await,
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_submit_never_runs_inline() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(shop_fetcher());
    let queue = create_queue(&dir.path().join("jobs.db"), fetcher.clone());

    let job_id = queue.submit(&shop_config()).unwrap();
    assert_eq!(queue.status(&job_id).unwrap(), JobState::Waiting);
    assert_eq!(fetcher.fetch_count(), 0);

    queue.start().unwrap();
    let result = queue.wait_for(&job_id, WAIT).await.unwrap();
    assert!(matches!(result, JobResult::Completed(_)));
    assert_eq!(fetcher.fetch_count(), 3);
    queue.shutdown();
}

#[tokio::test]
async fn test_jobs_outlive_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");

    let job_id = {
        let queue = create_queue(&db_path, Arc::new(shop_fetcher()));
        queue.start().unwrap();
        let job_id = queue.submit(&shop_config()).unwrap();
        queue.wait_for(&job_id, WAIT).await.unwrap();
        queue.shutdown();
        job_id
    };

    let store = SqliteJobStore::new(&db_path).unwrap();
    let job = store.get_job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.result.unwrap().products_persisted, 2);
}
