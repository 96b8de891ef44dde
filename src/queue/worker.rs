//! Job workers and the stall monitor
//!
//! Workers share one dispatch channel. Each dispatched job id is claimed in
//! the store before it runs, so a job dispatched twice only runs once.

use crate::crawler::{CancelToken, CANCELLED_REASON};
use crate::output::CrawlSummary;
use crate::queue::backoff::backoff_delay;
use crate::queue::{QueueResult, QueueShared};
use crate::state::JobState;
use crate::storage::{now_millis, JobRecord};
use crate::CrawlError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Pulls job ids off the dispatch channel until the queue shuts down
pub(super) async fn run_worker(shared: Arc<QueueShared>, worker_id: usize) {
    tracing::debug!("Job worker {} started", worker_id);

    loop {
        let next = {
            let mut rx = shared.dispatch_rx.lock().await;
            rx.recv().await
        };
        let Some(job_id) = next else {
            break;
        };

        if let Err(e) = process_job(&shared, &job_id).await {
            tracing::error!("Worker {} failed to process job {}: {}", worker_id, job_id, e);
        }
    }

    tracing::debug!("Job worker {} stopped", worker_id);
}

/// Claims and runs one job, then records its outcome
async fn process_job(shared: &Arc<QueueShared>, job_id: &str) -> QueueResult<()> {
    let cancel = CancelToken::new();
    if !shared.register_running(job_id, cancel.clone()) {
        tracing::debug!("Job {} is already running here", job_id);
        return Ok(());
    }

    let now = now_millis();
    let job = match shared.with_store(|store| store.claim_job(job_id, now)) {
        Ok(Some(job)) => job,
        Ok(None) => {
            shared.unregister_running(job_id);
            return redispatch_if_early(shared, job_id, now);
        }
        Err(e) => {
            shared.unregister_running(job_id);
            return Err(e);
        }
    };

    tracing::info!(
        "Job {} attempt {}/{} started",
        job.id,
        job.attempts,
        shared.settings.max_attempts
    );

    let outcome = run_with_heartbeat(shared, &job, cancel).await;
    let settled = settle(shared, &job, outcome);
    shared.unregister_running(job_id);
    settled
}

/// Dispatches a job again if it was handed out before its backoff ended
fn redispatch_if_early(shared: &Arc<QueueShared>, job_id: &str, now: i64) -> QueueResult<()> {
    let job = shared.with_store(|store| store.get_job(job_id))?;
    if job.state == JobState::Waiting && job.available_at > now {
        let wait = Duration::from_millis((job.available_at - now) as u64);
        shared.dispatch_after(job.id, wait);
    } else {
        tracing::debug!("Job {} is {}; skipping dispatch", job.id, job.state);
    }
    Ok(())
}

/// Runs the crawl while renewing the job's heartbeat
async fn run_with_heartbeat(
    shared: &QueueShared,
    job: &JobRecord,
    cancel: CancelToken,
) -> Result<CrawlSummary, CrawlError> {
    let run = shared.engine.run_with_cancel(&job.config, cancel);
    tokio::pin!(run);

    let mut heartbeat = tokio::time::interval(shared.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            outcome = &mut run => return outcome,
            _ = heartbeat.tick() => {
                let now = now_millis();
                if let Err(e) = shared.with_store(|store| store.record_heartbeat(&job.id, now)) {
                    tracing::warn!("Failed to renew heartbeat of job {}: {}", job.id, e);
                }
            }
        }
    }
}

/// Records a finished attempt: completion, a scheduled retry or failure
///
/// Each transition applies only while the job is still active. A job that
/// left the active state during the run keeps the state it was moved to.
fn settle(
    shared: &Arc<QueueShared>,
    job: &JobRecord,
    outcome: Result<CrawlSummary, CrawlError>,
) -> QueueResult<()> {
    let applied = match outcome {
        Ok(summary) => {
            let applied = shared.with_store(|store| store.complete_job(&job.id, &summary))?;
            if applied {
                tracing::info!(
                    "Job {} completed: {} products persisted from {} pages",
                    job.id,
                    summary.products_persisted,
                    summary.pages_processed
                );
            }
            applied
        }
        Err(CrawlError::Cancelled) => {
            let applied =
                shared.with_store(|store| store.fail_job(&job.id, JobState::Active, CANCELLED_REASON))?;
            if applied {
                tracing::info!("Job {} cancelled", job.id);
            }
            applied
        }
        Err(e) if e.is_retryable() && job.attempts < shared.settings.max_attempts => {
            let delay = backoff_delay(shared.settings.backoff_base_ms, job.attempts);
            let available_at = now_millis().saturating_add(delay.as_millis() as i64);
            let error = e.to_string();

            let applied = shared.with_store(|store| store.schedule_retry(&job.id, &error, available_at))?;
            if applied {
                tracing::warn!(
                    "Job {} attempt {}/{} failed: {}; retrying in {:?}",
                    job.id,
                    job.attempts,
                    shared.settings.max_attempts,
                    error,
                    delay
                );
                shared.dispatch_after(job.id.clone(), delay);
            }
            applied
        }
        Err(e) => {
            let error = e.to_string();
            let applied = shared.with_store(|store| store.fail_job(&job.id, JobState::Active, &error))?;
            if applied {
                tracing::error!(
                    "Job {} failed after {} attempts: {}",
                    job.id,
                    job.attempts,
                    error
                );
            }
            applied
        }
    };

    if !applied {
        let state = shared.with_store(|store| store.get_job(&job.id))?.state;
        tracing::info!("Job {} is already {}; attempt {} outcome dropped", job.id, state, job.attempts);
    }
    Ok(())
}

/// Periodically recovers active jobs whose heartbeat went quiet
pub(super) async fn run_stall_monitor(shared: Arc<QueueShared>) {
    let mut ticker = tokio::time::interval(shared.stalled_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match check_stalled(&shared) {
            Ok(0) => {}
            Ok(recovered) => tracing::info!("Recovered {} stalled jobs", recovered),
            Err(e) => tracing::warn!("Stall check failed: {}", e),
        }
    }
}

/// Recovers active jobs with a heartbeat older than the stall interval
///
/// Jobs running in this process are left alone.
///
/// # Returns
///
/// Number of jobs requeued or failed
pub(super) fn check_stalled(shared: &Arc<QueueShared>) -> QueueResult<usize> {
    let cutoff = now_millis().saturating_sub(shared.settings.stalled_interval_ms as i64);
    let stalled = shared.with_store(|store| store.list_stalled_jobs(cutoff))?;

    let mut recovered = 0;
    for job in stalled {
        if shared.is_running(&job.id) {
            tracing::debug!("Job {} has a late heartbeat but is still running", job.id);
            continue;
        }
        recover_stalled(shared, &job)?;
        recovered += 1;
    }
    Ok(recovered)
}

/// Requeues a stalled job, or fails it once it has stalled too often
fn recover_stalled(shared: &Arc<QueueShared>, job: &JobRecord) -> QueueResult<()> {
    let limit = shared.settings.max_stalled_count;
    if job.stalled_count >= limit {
        let error = format!("job stalled more than allowable limit ({})", limit);
        if shared.with_store(|store| store.fail_job(&job.id, JobState::Active, &error))? {
            tracing::warn!("Job {} failed: {}", job.id, error);
        }
        return Ok(());
    }

    if shared.with_store(|store| store.requeue_stalled(&job.id))? {
        tracing::warn!(
            "Job {} stalled; requeued ({}/{})",
            job.id,
            job.stalled_count + 1,
            limit
        );
        shared.dispatch(&job.id);
    }
    Ok(())
}

/// Re-dispatches jobs a previous process left behind
///
/// Waiting jobs are dispatched again; active jobs have no live worker any
/// more and are recovered as stalled.
///
/// # Returns
///
/// Number of jobs recovered
pub(super) fn recover_persisted(shared: &Arc<QueueShared>) -> QueueResult<usize> {
    let waiting = shared.with_store(|store| store.list_jobs_by_state(JobState::Waiting))?;
    let active = shared.with_store(|store| store.list_jobs_by_state(JobState::Active))?;
    let now = now_millis();

    for job in &waiting {
        if job.available_at > now {
            let wait = Duration::from_millis((job.available_at - now) as u64);
            shared.dispatch_after(job.id.clone(), wait);
        } else {
            shared.dispatch(&job.id);
        }
    }

    for job in &active {
        if !shared.is_running(&job.id) {
            recover_stalled(shared, job)?;
        }
    }

    Ok(waiting.len() + active.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlConfig, EngineSettings, QueueSettings};
    use crate::crawler::{FetchError, PageFetcher, PageHandle};
    use crate::output::ObjectStoreSink;
    use crate::queue::JobQueue;
    use crate::storage::{JobStore, SqliteJobStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use url::Url;

    struct OfflineFetcher;

    #[async_trait]
    impl PageFetcher for OfflineFetcher {
        async fn fetch(&self, url: &Url) -> Result<Box<dyn PageHandle>, FetchError> {
            Err(FetchError::Network {
                url: url.to_string(),
                message: "offline".to_string(),
            })
        }
    }

    fn create_test_job(id: &str) -> JobRecord {
        let config = CrawlConfig {
            start_urls: vec!["https://shop.test/".to_string()],
            product_card_selector: ".card".to_string(),
            ..CrawlConfig::default()
        };
        JobRecord::new(id, config, "hash")
    }

    fn create_shared(store: SqliteJobStore, settings: QueueSettings) -> Arc<QueueShared> {
        let queue = JobQueue::new(
            Arc::new(Mutex::new(store)),
            Arc::new(OfflineFetcher),
            Arc::new(ObjectStoreSink::in_memory()),
            settings,
            EngineSettings::default(),
        );
        queue.shared
    }

    fn stalled_store(stalled_count: u32) -> SqliteJobStore {
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        let mut job = create_test_job("job-1");
        job.stalled_count = stalled_count;
        store.insert_job(&job).unwrap();
        store.claim_job("job-1", 0).unwrap();
        store
    }

    #[tokio::test]
    async fn test_stalled_job_is_requeued() {
        let shared = create_shared(stalled_store(0), QueueSettings::default());

        assert_eq!(check_stalled(&shared).unwrap(), 1);

        let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.stalled_count, 1);

        let dispatched = shared.dispatch_rx.lock().await.try_recv().unwrap();
        assert_eq!(dispatched, "job-1");
    }

    #[tokio::test]
    async fn test_job_fails_after_max_stalls() {
        let settings = QueueSettings {
            max_stalled_count: 2,
            ..QueueSettings::default()
        };
        let shared = create_shared(stalled_store(2), settings);

        assert_eq!(check_stalled(&shared).unwrap(), 1);

        let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("stalled more than allowable limit"));
    }

    #[tokio::test]
    async fn test_running_job_is_not_stalled() {
        let shared = create_shared(stalled_store(0), QueueSettings::default());
        assert!(shared.register_running("job-1", CancelToken::new()));

        assert_eq!(check_stalled(&shared).unwrap(), 0);
        let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
        assert_eq!(job.state, JobState::Active);
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_is_not_stalled() {
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", now_millis()).unwrap();
        let shared = create_shared(store, QueueSettings::default());

        assert_eq!(check_stalled(&shared).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recover_persisted_dispatches_waiting_jobs() {
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        store.insert_job(&create_test_job("waiting")).unwrap();
        store.insert_job(&create_test_job("active")).unwrap();
        store.claim_job("active", now_millis()).unwrap();
        let shared = create_shared(store, QueueSettings::default());

        assert_eq!(recover_persisted(&shared).unwrap(), 2);

        let mut rx = shared.dispatch_rx.lock().await;
        let mut dispatched = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        dispatched.sort();
        assert_eq!(dispatched, vec!["active".to_string(), "waiting".to_string()]);
    }

    #[tokio::test]
    async fn test_early_dispatch_is_skipped() {
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        store.insert_job(&create_test_job("job-1")).unwrap();
        store.claim_job("job-1", 0).unwrap();
        store
            .schedule_retry("job-1", "boom", now_millis() + 60_000)
            .unwrap();
        let shared = create_shared(store, QueueSettings::default());

        process_job(&shared, "job-1").await.unwrap();

        let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 1);
        assert!(!shared.is_running("job-1"));
    }

    #[tokio::test]
    async fn test_settle_keeps_state_set_during_run() {
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        store.insert_job(&create_test_job("job-1")).unwrap();
        let job = store.claim_job("job-1", 0).unwrap().unwrap();
        // Failed by another party while the crawl was still running
        store.fail_job("job-1", JobState::Active, CANCELLED_REASON).unwrap();
        let shared = create_shared(store, QueueSettings::default());

        settle(&shared, &job, Ok(CrawlSummary::default())).unwrap();

        let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_REASON));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_retry_delays_grow_with_attempts() {
        let settings = QueueSettings {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            ..QueueSettings::default()
        };
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        store.insert_job(&create_test_job("job-1")).unwrap();
        let shared = create_shared(store, settings);

        let mut delays = Vec::new();
        for _ in 0..4 {
            let job = shared
                .with_store(|store| store.claim_job("job-1", i64::MAX))
                .unwrap()
                .unwrap();
            let before = now_millis();
            settle(&shared, &job, Err(CrawlError::Fatal("renderer crashed".to_string()))).unwrap();

            let job = shared.with_store(|store| store.get_job("job-1")).unwrap();
            assert_eq!(job.state, JobState::Waiting);
            delays.push(job.available_at - before);
        }

        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", delays);
        assert!(delays[0] >= 1_000);
    }
}
