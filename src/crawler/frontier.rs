//! Crawl frontier
//!
//! This module handles:
//! - Priority queue management for URLs to fetch
//! - At-most-once admission of each normalized URL per crawl
//! - The separate ledger of pagination hops
//! - The per-crawl fetch budget shared by admission and pagination

use crate::crawler::fetcher::PageHandle;
use crate::url::{normalize_url, resolve_and_normalize};
use crate::UrlError;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// Priority of ordinary discoveries
pub const DEFAULT_PRIORITY: u32 = 0;

/// Priority of listing pages reached through pagination
pub const PAGINATION_PRIORITY: u32 = 1;

/// Handler a frontier entry is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Seed URLs
    Default,
    Listing,
    Product,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Listing => write!(f, "listing"),
            Self::Product => write!(f, "product"),
        }
    }
}

/// A URL waiting to be fetched
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    /// Normalized absolute URL
    pub url: Url,

    pub route: Route,

    /// Higher values are dequeued first
    pub priority: u32,

    /// Insertion order, for FIFO among equal priorities
    pub seq: u64,
}

// BinaryHeap pops the greatest entry: highest priority, then lowest seq
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}

/// Result of asking the frontier for the next page to handle
pub enum Admission {
    /// An entry to dispatch, with its page if pagination already loaded it
    Ready {
        entry: FrontierEntry,
        page: Option<Box<dyn PageHandle>>,
    },

    /// The fetch budget is spent; entries remain queued
    CeilingReached,

    /// Nothing is queued
    Exhausted,
}

struct FrontierInner {
    heap: BinaryHeap<FrontierEntry>,
    queued: HashSet<String>,
    processed: HashSet<String>,
    paginated: HashSet<String>,
    loaded: HashMap<String, Box<dyn PageHandle>>,
    next_seq: u64,
    ceiling: u64,
    fetches: u64,
}

impl FrontierInner {
    fn new(ceiling: u64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            queued: HashSet::new(),
            processed: HashSet::new(),
            paginated: HashSet::new(),
            loaded: HashMap::new(),
            next_seq: 0,
            ceiling,
            fetches: 0,
        }
    }

    fn is_known(&self, key: &str) -> bool {
        self.queued.contains(key) || self.processed.contains(key)
    }

    fn push(&mut self, url: Url, route: Route, priority: u32) {
        self.queued.insert(url.as_str().to_string());
        self.heap.push(FrontierEntry {
            url,
            route,
            priority,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    fn reserve(&mut self) -> bool {
        if self.fetches >= self.ceiling {
            return false;
        }
        self.fetches += 1;
        true
    }
}

/// The set of discovered-but-unfetched URLs of one crawl, plus its ledger
///
/// Every check-and-insert happens under one lock, so concurrent handlers
/// discovering the same link enqueue it once. The same lock guards the fetch
/// budget: each fetch, whether from admission or from a pagination hop, is
/// charged exactly once.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Frontier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Frontier")
            .field("queued", &inner.heap.len())
            .field("processed", &inner.processed.len())
            .field("fetches", &inner.fetches)
            .field("ceiling", &inner.ceiling)
            .finish()
    }
}

impl Frontier {
    /// Creates a frontier without a fetch budget
    pub fn new() -> Self {
        Self::with_ceiling(u64::MAX)
    }

    /// Creates a frontier that allows at most `ceiling` fetches
    pub fn with_ceiling(ceiling: u64) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::new(ceiling)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a seed URL
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The seed was queued
    /// * `Ok(false)` - The seed duplicates an earlier one
    /// * `Err(UrlError)` - The seed is not a crawlable URL
    pub fn seed(&self, url: &str, route: Route) -> Result<bool, UrlError> {
        let url = normalize_url(url)?;
        let mut inner = self.lock();
        if inner.is_known(url.as_str()) {
            return Ok(false);
        }
        inner.push(url, route, DEFAULT_PRIORITY);
        Ok(true)
    }

    /// Queues a discovered link unless its normalized form was seen before
    ///
    /// # Arguments
    ///
    /// * `href` - Link as found on the page, possibly relative
    /// * `base` - URL of the page the link was found on
    /// * `route` - Handler for the link
    /// * `priority` - Dequeue priority
    ///
    /// # Returns
    ///
    /// `true` only if this call queued the URL
    pub fn try_enqueue(&self, href: &str, base: &Url, route: Route, priority: u32) -> bool {
        let url = match resolve_and_normalize(href, base) {
            Ok(url) => url,
            Err(e) => {
                tracing::trace!("Skipping link '{}': {}", href, e);
                return false;
            }
        };

        let mut inner = self.lock();
        if inner.is_known(url.as_str()) {
            return false;
        }
        inner.push(url, route, priority);
        true
    }

    /// Queues the page reached by paginating from `origin`
    ///
    /// Pagination hops bypass first-visit dedup only for the listing being
    /// paginated in place (`page` loaded from `origin` itself). Each physical
    /// page is requeued at most once, and a page already queued or processed
    /// under its own URL is never queued again. A queued page is handed out by
    /// [`Frontier::admit`] instead of being fetched a second time.
    ///
    /// # Returns
    ///
    /// `true` only if this call queued the page
    pub fn requeue_pagination(&self, origin: &Url, page: Box<dyn PageHandle>) -> bool {
        let Ok(origin) = normalize_url(origin.as_str()) else {
            return false;
        };
        let Ok(next) = normalize_url(page.url().as_str()) else {
            return false;
        };

        let key = next.as_str().to_string();
        let mut inner = self.lock();

        if inner.paginated.contains(&key) || inner.queued.contains(&key) {
            return false;
        }
        if inner.processed.contains(&key) && next != origin {
            return false;
        }

        inner.paginated.insert(key.clone());
        inner.loaded.insert(key, page);
        inner.push(next, Route::Listing, PAGINATION_PRIORITY);
        true
    }

    /// Takes the next entry to handle and records it as processed
    ///
    /// An entry whose page is not loaded yet costs one fetch from the budget;
    /// once the budget is spent such entries stay queued.
    pub fn admit(&self) -> Admission {
        let mut inner = self.lock();

        let loaded = match inner.heap.peek() {
            Some(head) => inner.loaded.contains_key(head.url.as_str()),
            None => return Admission::Exhausted,
        };
        if !loaded && !inner.reserve() {
            return Admission::CeilingReached;
        }

        let Some(entry) = inner.heap.pop() else {
            return Admission::Exhausted;
        };
        let key = entry.url.as_str().to_string();
        let page = inner.loaded.remove(&key);
        inner.queued.remove(&key);
        inner.processed.insert(key);
        Admission::Ready { entry, page }
    }

    /// Charges one fetch made outside admission
    ///
    /// # Returns
    ///
    /// `false` if the budget is spent and the fetch must not happen
    pub fn reserve_fetch(&self) -> bool {
        self.lock().reserve()
    }

    /// Number of fetches charged so far
    pub fn fetches(&self) -> u64 {
        self.lock().fetches
    }

    /// Number of entries waiting
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

#[cfg(test)]
impl Frontier {
    /// Admits the next entry, dropping any loaded page
    pub(crate) fn dequeue(&self) -> Option<FrontierEntry> {
        match self.admit() {
            Admission::Ready { entry, .. } => Some(entry),
            Admission::CeilingReached | Admission::Exhausted => None,
        }
    }
}
