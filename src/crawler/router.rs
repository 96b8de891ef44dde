//! Per-URL crawl state machine
//!
//! | Route | On fetch | Leads to |
//! |-------|----------|----------|
//! | `Default` | classify up to `root-link-limit` same-host links | `Listing`, `Product` |
//! | `Listing` | wait for product cards, queue each card's link, paginate | `Product`, `Listing` |
//! | `Product` | persist the page through the artifact sink | terminal |
//!
//! No route leads back to `Default`. Every error here is local to the URL
//! being handled.

use crate::config::{CrawlConfig, EngineSettings};
use crate::crawler::fetcher::{with_page_timeout, FetchError, PageFetcher, PageHandle};
use crate::crawler::frontier::{Frontier, FrontierEntry, Route, DEFAULT_PRIORITY};
use crate::crawler::pagination::{PaginationStep, PaginationWalker};
use crate::output::{artifact_key, ArtifactSink, SinkError, StoredArtifact, HTML_CONTENT_TYPE};
use crate::url::{normalize_url, same_host, Classification, PatternMatcher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that abandon a single URL without stopping the crawl
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Listing page {url} has no '{selector}'")]
    ClassificationMismatch { url: String, selector: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to persist product {url}: {source}")]
    Persistence {
        url: String,
        #[source]
        source: SinkError,
    },
}

impl HandlerError {
    /// Returns true if the page was loaded before the handler gave up
    pub fn fetched_page(&self) -> bool {
        !matches!(self, Self::Fetch(_))
    }
}

/// What handling one URL produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// A seed page queued this many links
    Seeded { enqueued: usize },

    /// A listing page queued this many products, then paginated
    Listing {
        products: usize,
        pagination: PaginationStep,
    },

    /// A product page was stored
    Product { artifact: StoredArtifact },
}

/// Dispatches frontier entries to their route handler
pub struct Router {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn ArtifactSink>,
    frontier: Arc<Frontier>,
    matcher: PatternMatcher,
    walker: PaginationWalker,
    config: CrawlConfig,
    settings: EngineSettings,
}

impl Router {
    /// Creates a router for one crawl
    ///
    /// `config` must already be validated.
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn ArtifactSink>,
        frontier: Arc<Frontier>,
        matcher: PatternMatcher,
        config: CrawlConfig,
        settings: EngineSettings,
    ) -> Self {
        let walker = PaginationWalker::new(
            config.pagination_selector.clone(),
            config.product_card_selector.clone(),
            Duration::from_millis(settings.page_timeout_ms),
        );

        Self {
            fetcher,
            sink,
            frontier,
            matcher,
            walker,
            config,
            settings,
        }
    }

    fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.page_timeout_ms)
    }

    /// Handles one entry according to its route
    ///
    /// `loaded` is the entry's page when pagination already fetched it;
    /// otherwise the page is fetched here.
    pub async fn dispatch(
        &self,
        entry: &FrontierEntry,
        loaded: Option<Box<dyn PageHandle>>,
    ) -> Result<PageOutcome, HandlerError> {
        let page = match loaded {
            Some(page) => page,
            None => with_page_timeout(&entry.url, self.page_timeout(), self.fetcher.fetch(&entry.url)).await?,
        };

        match entry.route {
            Route::Default => self.handle_default(page.as_ref()).await,
            Route::Listing => self.handle_listing(page.as_ref()).await,
            Route::Product => self.handle_product(page.as_ref()).await,
        }
    }

    /// Queues classified same-host links of a seed page
    async fn handle_default(&self, page: &dyn PageHandle) -> Result<PageOutcome, HandlerError> {
        let links = page.links().await?;
        let mut enqueued = 0;

        for link in links
            .iter()
            .filter(|link| same_host(link, page.url()))
            .take(self.settings.root_link_limit)
        {
            let Ok(normalized) = normalize_url(link.as_str()) else {
                continue;
            };

            let route = match self.matcher.classify(&normalized) {
                Classification::Listing => Route::Listing,
                Classification::Product => Route::Product,
                Classification::Unclassified => continue,
            };

            if self
                .frontier
                .try_enqueue(link.as_str(), page.url(), route, DEFAULT_PRIORITY)
            {
                enqueued += 1;
            }
        }

        tracing::debug!("Seed {} queued {} links", page.url(), enqueued);
        Ok(PageOutcome::Seeded { enqueued })
    }

    /// Queues the product behind each card, then paginates
    async fn handle_listing(&self, page: &dyn PageHandle) -> Result<PageOutcome, HandlerError> {
        let card_selector = &self.config.product_card_selector;

        match with_page_timeout(
            page.url(),
            self.page_timeout(),
            page.wait_for_selector(card_selector, self.page_timeout()),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                return Err(HandlerError::ClassificationMismatch {
                    url: page.url().to_string(),
                    selector: card_selector.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        let cards = page.query_selector_all(card_selector).await?;
        let mut products = 0;

        for card in &cards {
            match card.link(&self.config.product_link_selectors) {
                Some(href) => {
                    if self
                        .frontier
                        .try_enqueue(&href, page.url(), Route::Product, DEFAULT_PRIORITY)
                    {
                        products += 1;
                    }
                }
                None => tracing::trace!("Card without product link on {}", page.url()),
            }
        }

        let pagination = self
            .walker
            .advance(self.fetcher.as_ref(), &self.frontier, page)
            .await;

        tracing::debug!(
            "Listing {} ({} cards) queued {} products, pagination: {:?}",
            page.url(),
            cards.len(),
            products,
            pagination
        );

        Ok(PageOutcome::Listing {
            products,
            pagination,
        })
    }

    /// Stores a product page
    async fn handle_product(&self, page: &dyn PageHandle) -> Result<PageOutcome, HandlerError> {
        let content = page.content().await?;
        let key = artifact_key(&self.settings.artifact_prefix);

        let artifact = self
            .sink
            .persist(&key, &content, HTML_CONTENT_TYPE)
            .await
            .map_err(|source| HandlerError::Persistence {
                url: page.url().to_string(),
                source,
            })?;

        tracing::debug!("Stored product {} as {}", page.url(), artifact.key);
        Ok(PageOutcome::Product { artifact })
    }
}
