//! Crawler module for page fetching and crawl orchestration
//!
//! This module contains the core crawling logic, including:
//! - The frontier and its dedup ledger
//! - The page fetching collaborator and its HTTP implementation
//! - HTML evaluation (links, selectors, controls)
//! - The per-URL route state machine and pagination walker
//! - The bounded-concurrency crawl engine

mod engine;
mod fetcher;
mod frontier;
mod pagination;
mod parser;
mod router;

pub use engine::{CancelToken, CrawlEngine, CrawlHandle, CANCELLED_REASON};
pub use fetcher::{
    build_http_client, with_page_timeout, ControlHandle, ElementHandle, FetchError,
    HttpPageFetcher, PageFetcher, PageHandle, StaticPage,
};
pub use frontier::{Admission, Frontier, FrontierEntry, Route, DEFAULT_PRIORITY, PAGINATION_PRIORITY};
pub use pagination::{PaginationStep, PaginationWalker};
pub use parser::{extract_links, locate_control, select_elements};
pub use router::{HandlerError, PageOutcome, Router};
