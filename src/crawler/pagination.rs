//! Pagination traversal for listing pages

use crate::crawler::fetcher::{with_page_timeout, PageFetcher, PageHandle};
use crate::crawler::frontier::Frontier;
use std::time::Duration;
use url::Url;

/// How a pagination attempt on one listing page ended
///
/// Every variant is a normal end of the attempt; none aborts the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationStep {
    /// No actionable control on the page, or pagination is disabled
    NoControl,

    /// The next page was queued as a listing at pagination priority
    Requeued(Url),

    /// The next page was already queued, processed or paginated to
    AlreadyQueued(Url),

    /// Following the control or loading the next page failed
    NavigationFailed(String),

    /// The crawl's fetch budget has no room for the next page
    CeilingReached,
}

impl PaginationStep {
    /// Returns true if the chain continues with a queued page
    pub fn continues(&self) -> bool {
        matches!(self, Self::Requeued(_))
    }
}

/// Follows "next page" controls on listing pages
#[derive(Debug, Clone)]
pub struct PaginationWalker {
    control_selector: String,
    card_selector: String,
    timeout: Duration,
}

impl PaginationWalker {
    /// Creates a walker
    ///
    /// # Arguments
    ///
    /// * `control_selector` - Selector of the "next page" control
    /// * `card_selector` - Selector that must appear on the next page
    /// * `timeout` - Bound on navigation and on the selector wait
    pub fn new(
        control_selector: impl Into<String>,
        card_selector: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            control_selector: control_selector.into(),
            card_selector: card_selector.into(),
            timeout,
        }
    }

    /// Advances pagination from `page`
    ///
    /// Locates the control, follows it through the fetcher, waits for the
    /// product cards on the resulting page and queues that page as a listing
    /// ahead of ordinary work. Following the control is charged to the
    /// frontier's fetch budget, and the loaded page is queued with the entry
    /// so admission does not fetch it a second time.
    pub async fn advance(
        &self,
        fetcher: &dyn PageFetcher,
        frontier: &Frontier,
        page: &dyn PageHandle,
    ) -> PaginationStep {
        if self.control_selector.trim().is_empty() {
            return PaginationStep::NoControl;
        }

        let control = match page.locate(&self.control_selector).await {
            Ok(Some(control)) if control.is_actionable() => control,
            Ok(_) => return PaginationStep::NoControl,
            Err(e) => return PaginationStep::NavigationFailed(e.to_string()),
        };

        if !frontier.reserve_fetch() {
            tracing::debug!("Fetch ceiling reached before paginating {}", page.url());
            return PaginationStep::CeilingReached;
        }

        tracing::trace!("Following '{}' on {}", control.text, page.url());
        let next = match with_page_timeout(page.url(), self.timeout, fetcher.navigate(page, &control)).await {
            Ok(next) => next,
            Err(e) => return PaginationStep::NavigationFailed(e.to_string()),
        };

        if let Err(e) = with_page_timeout(
            next.url(),
            self.timeout,
            next.wait_for_selector(&self.card_selector, self.timeout),
        )
        .await
        {
            return PaginationStep::NavigationFailed(e.to_string());
        }

        let next_url = next.url().clone();
        if frontier.requeue_pagination(page.url(), next) {
            tracing::debug!("Paginated {} -> {}", page.url(), next_url);
            PaginationStep::Requeued(next_url)
        } else {
            PaginationStep::AlreadyQueued(next_url)
        }
    }
}
