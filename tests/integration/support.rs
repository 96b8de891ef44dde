//! Fakes shared by the integration tests

use async_trait::async_trait;
use shelf_crawl::crawler::{FetchError, PageFetcher, PageHandle, StaticPage};
use shelf_crawl::output::{SinkError, SinkResult, StoredArtifact};
use shelf_crawl::{ArtifactSink, CrawlConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// Serves pages from a map and counts every fetch
pub struct MapFetcher {
    pages: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl MapFetcher {
    pub fn new<S: AsRef<str>>(pages: &[(S, S)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.as_ref().to_string(), html.as_ref().to_string()))
                .collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &Url) -> Result<Box<dyn PageHandle>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url.as_str()) {
            Some(html) => Ok(Box::new(StaticPage::new(url.clone(), html.clone()))),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Crashes the handler task on every fetch
pub struct PanickingFetcher;

#[async_trait]
impl PageFetcher for PanickingFetcher {
    async fn fetch(&self, _url: &Url) -> Result<Box<dyn PageHandle>, FetchError> {
        panic!("renderer crashed");
    }
}

/// Rejects every artifact
pub struct FailingSink;

#[async_trait]
impl ArtifactSink for FailingSink {
    async fn persist(
        &self,
        key: &str,
        _content: &str,
        _content_type: &str,
    ) -> SinkResult<StoredArtifact> {
        Err(SinkError::Rejected {
            key: key.to_string(),
            reason: "bucket is read-only".to_string(),
        })
    }
}

/// The shop used by the crawl scenarios
pub fn shop_config() -> CrawlConfig {
    CrawlConfig {
        start_urls: vec!["https://shop.test/cat".to_string()],
        listing_url_patterns: vec!["/cat".to_string()],
        product_url_patterns: vec![r"/item/\d+".to_string()],
        product_card_selector: ".card".to_string(),
        ..CrawlConfig::default()
    }
}

/// A page linking to `/item/1` through `/item/{count}`
pub fn product_links(count: usize) -> String {
    let links: String = (1..=count)
        .map(|i| format!(r#"<a href="/item/{}">Item {}</a>"#, i, i))
        .collect();
    format!("<html><body>{}</body></html>", links)
}

/// Pages for `/item/1` through `/item/{count}`
pub fn product_pages(count: usize) -> Vec<(String, String)> {
    (1..=count)
        .map(|i| {
            (
                format!("https://shop.test/item/{}", i),
                format!("<html><body><h1>Item {}</h1></body></html>", i),
            )
        })
        .collect()
}
