//! Crawl engine - bounded-concurrency crawl orchestration
//!
//! This module contains the crawl loop that:
//! - Seeds the frontier with the start URLs
//! - Admits entries up to the worker limit and the fetch ceiling
//!   (pagination hops draw on the same ceiling through the frontier)
//! - Dispatches each entry to the router on its own task
//! - Aggregates handler outcomes into the crawl state
//! - Stops admitting on cancellation, letting in-flight pages finish
//!   (a crawl with nothing left to admit still completes)

use crate::config::{validate_and_apply_defaults, CrawlConfig, EngineSettings};
use crate::crawler::fetcher::PageFetcher;
use crate::crawler::frontier::{Admission, Frontier, FrontierEntry, Route};
use crate::crawler::router::{HandlerError, PageOutcome, Router};
use crate::output::{ArtifactSink, CrawlSummary};
use crate::state::{CrawlState, CrawlStatus};
use crate::url::PatternMatcher;
use crate::{ConfigError, CrawlError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// Reason recorded on a crawl stopped through its [`CancelToken`]
pub const CANCELLED_REASON: &str = "cancelled";

/// Shared flag asking a crawl to stop admitting pages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A crawl running in the background
pub struct CrawlHandle {
    crawl_id: String,
    cancel: CancelToken,
    task: JoinHandle<Result<CrawlSummary, CrawlError>>,
}

impl CrawlHandle {
    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    /// Stops admitting new pages; in-flight pages still finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the crawl to end
    pub async fn join(self) -> Result<CrawlSummary, CrawlError> {
        self.task
            .await
            .map_err(|e| CrawlError::Fatal(format!("crawl task failed: {}", e)))?
    }
}

/// Drives crawls over injected fetcher and sink collaborators
#[derive(Clone)]
pub struct CrawlEngine {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn ArtifactSink>,
    settings: EngineSettings,
}

impl CrawlEngine {
    /// Creates an engine
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Loads and evaluates pages
    /// * `sink` - Stores product pages
    /// * `settings` - Worker count, page timeout and routing limits
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn ArtifactSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            fetcher,
            sink,
            settings,
        }
    }

    /// Runs a crawl to completion
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The frontier was exhausted or the ceiling reached
    /// * `Err(CrawlError)` - The config was rejected or the crawl loop failed
    pub async fn run(&self, config: &CrawlConfig) -> Result<CrawlSummary, CrawlError> {
        self.run_with_cancel(config, CancelToken::new()).await
    }

    /// Runs a crawl that stops admitting pages once `cancel` fires
    pub async fn run_with_cancel(
        &self,
        config: &CrawlConfig,
        cancel: CancelToken,
    ) -> Result<CrawlSummary, CrawlError> {
        let config = validate_and_apply_defaults(config)?;
        self.execute(Uuid::new_v4().to_string(), config, cancel).await
    }

    /// Validates `config` and starts the crawl on a background task
    pub fn start(&self, config: &CrawlConfig) -> Result<CrawlHandle, CrawlError> {
        let config = validate_and_apply_defaults(config)?;
        let crawl_id = Uuid::new_v4().to_string();
        let cancel = CancelToken::new();

        let engine = self.clone();
        let task = {
            let crawl_id = crawl_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.execute(crawl_id, config, cancel).await })
        };

        Ok(CrawlHandle {
            crawl_id,
            cancel,
            task,
        })
    }

    async fn execute(
        &self,
        crawl_id: String,
        config: CrawlConfig,
        cancel: CancelToken,
    ) -> Result<CrawlSummary, CrawlError> {
        let ceiling = config.fetch_ceiling();
        let frontier = Arc::new(Frontier::with_ceiling(ceiling));
        for url in &config.start_urls {
            frontier
                .seed(url, Route::Default)
                .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", url, e)))?;
        }

        let matcher = PatternMatcher::new(&config)?;
        let workers = self.settings.workers.max(1);

        tracing::info!(
            "Starting crawl {} with {} seeds ({} workers, ceiling {} fetches)",
            crawl_id,
            frontier.len(),
            workers,
            ceiling
        );

        let router = Arc::new(Router::new(
            self.fetcher.clone(),
            self.sink.clone(),
            frontier.clone(),
            matcher,
            config,
            self.settings.clone(),
        ));

        let mut state = CrawlState::new(crawl_id);
        let mut tasks: JoinSet<(FrontierEntry, Result<PageOutcome, HandlerError>)> = JoinSet::new();
        let mut fatal: Option<String> = None;
        let mut cancelled = false;
        let mut ceiling_logged = false;

        loop {
            // Admission: the only place entries leave the frontier
            while tasks.len() < workers && fatal.is_none() {
                if cancel.is_cancelled() {
                    cancelled |= !frontier.is_empty();
                    break;
                }

                let (entry, loaded) = match frontier.admit() {
                    Admission::Ready { entry, page } => (entry, page),
                    Admission::CeilingReached => {
                        if !ceiling_logged {
                            tracing::info!(
                                "Fetch ceiling of {} reached with {} URLs left in the frontier",
                                ceiling,
                                frontier.len()
                            );
                            ceiling_logged = true;
                        }
                        break;
                    }
                    Admission::Exhausted => break,
                };
                tracing::debug!(
                    "Admitting {} ({}{})",
                    entry.url,
                    entry.route,
                    if loaded.is_some() { ", already loaded" } else { "" }
                );

                let router = router.clone();
                tasks.spawn(async move {
                    let result = router.dispatch(&entry, loaded).await;
                    (entry, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((entry, result)) => record_outcome(&mut state, &entry, result),
                Err(e) => {
                    tracing::error!("Crawl {} worker task failed: {}", state.crawl_id(), e);
                    fatal.get_or_insert_with(|| e.to_string());
                }
            }
        }

        state.record_fetches(frontier.fetches());

        if let Some(reason) = fatal {
            state.finish(CrawlStatus::Failed {
                reason: reason.clone(),
            });
            tracing::error!("Crawl {} {}", state.crawl_id(), state.status());
            return Err(CrawlError::Fatal(reason));
        }

        if cancelled {
            state.finish(CrawlStatus::Failed {
                reason: CANCELLED_REASON.to_string(),
            });
            tracing::info!(
                "Crawl {} {} after {} fetches with {} URLs left in the frontier",
                state.crawl_id(),
                state.status(),
                state.page_count(),
                frontier.len()
            );
            return Err(CrawlError::Cancelled);
        }

        state.finish(CrawlStatus::Completed);
        let summary = state.summary();
        tracing::info!(
            "Crawl {} {}: {} pages processed, {} products persisted, {} fetches",
            summary.crawl_id,
            state.status(),
            summary.pages_processed,
            summary.products_persisted,
            summary.pages_fetched
        );

        Ok(summary)
    }
}

/// Folds one handler result into the crawl counters
fn record_outcome(
    state: &mut CrawlState,
    entry: &FrontierEntry,
    result: Result<PageOutcome, HandlerError>,
) {
    match result {
        Ok(PageOutcome::Seeded { .. }) => {}
        Ok(PageOutcome::Listing { .. }) => state.record_processed(),
        Ok(PageOutcome::Product { .. }) => {
            state.record_processed();
            state.record_persisted();
        }
        Err(e) => {
            if e.fetched_page() && entry.route != Route::Default {
                state.record_processed();
            }
            state.record_abandoned();
            tracing::warn!("Abandoned {} ({}): {}", entry.url, entry.route, e);
        }
    }
}
