//! Integration tests for the crawl engine
//!
//! The scenario tests drive the engine over in-memory fakes; the HTTP tests
//! use wiremock to exercise the reqwest-backed fetcher end-to-end.

use crate::support::{product_links, product_pages, shop_config, FailingSink, MapFetcher};
use shelf_crawl::config::{EngineSettings, UserAgentSettings};
use shelf_crawl::crawler::HttpPageFetcher;
use shelf_crawl::output::ObjectStoreSink;
use shelf_crawl::{ArtifactSink, CrawlConfig, CrawlEngine};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn shop_pages(listing_html: String, products: usize) -> Vec<(String, String)> {
    let mut pages = vec![("https://shop.test/cat".to_string(), listing_html)];
    pages.extend(product_pages(products));
    pages
}

fn create_engine(fetcher: Arc<MapFetcher>, sink: Arc<dyn ArtifactSink>) -> CrawlEngine {
    CrawlEngine::new(fetcher, sink, EngineSettings::default())
}

#[tokio::test]
async fn test_crawl_persists_discovered_products() {
    let fetcher = Arc::new(MapFetcher::new(&shop_pages(product_links(2), 2)));
    let engine = create_engine(fetcher.clone(), Arc::new(ObjectStoreSink::in_memory()));

    let summary = engine.run(&shop_config()).await.unwrap();

    assert_eq!(summary.pages_processed, 2);
    assert_eq!(summary.products_persisted, 2);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.urls_abandoned, 0);
    assert_eq!(fetcher.fetch_count(), 3);
}

#[tokio::test]
async fn test_failing_sink_does_not_fail_the_crawl() {
    let fetcher = Arc::new(MapFetcher::new(&shop_pages(product_links(2), 2)));
    let engine = create_engine(fetcher, Arc::new(FailingSink));

    let summary = engine.run(&shop_config()).await.unwrap();

    assert_eq!(summary.pages_processed, 2);
    assert_eq!(summary.products_persisted, 0);
    assert_eq!(summary.urls_abandoned, 2);
}

#[tokio::test]
async fn test_max_pages_bounds_fetches() {
    let fetcher = Arc::new(MapFetcher::new(&shop_pages(product_links(50), 50)));
    let engine = create_engine(fetcher.clone(), Arc::new(ObjectStoreSink::in_memory()));

    let config = CrawlConfig {
        max_pages: Some(1),
        ..shop_config()
    };
    let summary = engine.run(&config).await.unwrap();

    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.pages_processed, 1);
    assert_eq!(summary.products_persisted, 1);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test]
async fn test_listing_pagination_flow() {
    let home = r#"<html><body><a href="/cat">Shoes</a><a href="/about">About</a></body></html>"#;
    let first = r#"<html><body>
        <div class="card"><a href="/item/1">Boot</a></div>
        <div class="card"><a href="/item/2">Sandal</a></div>
        <a class="next" href="/cat?page=2">Next</a>
    </body></html>"#;
    let second = r#"<html><body>
        <div class="card"><a href="/item/3">Slipper</a></div>
        <div class="card"><a href="/item/1">Boot again</a></div>
        <a class="next disabled" href="/cat?page=3">Next</a>
    </body></html>"#;

    let mut pages = vec![
        ("https://shop.test/".to_string(), home.to_string()),
        ("https://shop.test/cat".to_string(), first.to_string()),
        ("https://shop.test/cat?page=2".to_string(), second.to_string()),
    ];
    pages.extend(product_pages(3));
    let fetcher = Arc::new(MapFetcher::new(&pages));
    let engine = create_engine(fetcher.clone(), Arc::new(ObjectStoreSink::in_memory()));

    let config = CrawlConfig {
        start_urls: vec!["https://shop.test/".to_string()],
        pagination_selector: "a.next".to_string(),
        ..shop_config()
    };
    let summary = engine.run(&config).await.unwrap();

    // Two listing pages and three distinct products
    assert_eq!(summary.pages_processed, 5);
    assert_eq!(summary.products_persisted, 3);
    assert_eq!(summary.pages_fetched, 6);
    assert_eq!(summary.urls_abandoned, 0);
    // Page two is loaded once, by following the "next" control
    assert_eq!(fetcher.fetch_count(), 6);
}

#[tokio::test]
async fn test_pagination_stays_within_fetch_ceiling() {
    let home = r#"<a href="/cat">Shoes</a>"#;
    let listing = r#"<div class="card"><a href="/item/1">Boot</a></div><a class="next" href="/cat?page=2">Next</a>"#;
    let mut pages = vec![
        ("https://shop.test/".to_string(), home.to_string()),
        ("https://shop.test/cat".to_string(), listing.to_string()),
        ("https://shop.test/cat?page=2".to_string(), listing.to_string()),
    ];
    pages.extend(product_pages(1));
    let fetcher = Arc::new(MapFetcher::new(&pages));
    let engine = create_engine(fetcher.clone(), Arc::new(ObjectStoreSink::in_memory()));

    let config = CrawlConfig {
        start_urls: vec!["https://shop.test/".to_string()],
        pagination_selector: "a.next".to_string(),
        max_pages: Some(1),
        ..shop_config()
    };
    let summary = engine.run(&config).await.unwrap();

    let ceiling = config.fetch_ceiling();
    assert!(fetcher.fetch_count() as u64 <= ceiling);
    assert_eq!(summary.pages_fetched, fetcher.fetch_count() as u64);
}

#[tokio::test]
async fn test_listing_without_cards_is_abandoned() {
    let pages = vec![
        (
            "https://shop.test/".to_string(),
            r#"<a href="/cat">Shoes</a>"#.to_string(),
        ),
        (
            "https://shop.test/cat".to_string(),
            "<html><body><p>Nothing here</p></body></html>".to_string(),
        ),
    ];
    let fetcher = Arc::new(MapFetcher::new(&pages));
    let settings = EngineSettings {
        page_timeout_ms: 200,
        ..EngineSettings::default()
    };
    let engine = CrawlEngine::new(fetcher, Arc::new(ObjectStoreSink::in_memory()), settings);

    let config = CrawlConfig {
        start_urls: vec!["https://shop.test/".to_string()],
        ..shop_config()
    };
    let summary = engine.run(&config).await.unwrap();

    assert_eq!(summary.pages_processed, 1);
    assert_eq!(summary.products_persisted, 0);
    assert_eq!(summary.urls_abandoned, 1);
}

#[tokio::test]
async fn test_http_fetcher_crawl() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", "TestBot/1.0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(product_links(3), "text/html; charset=utf-8"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html><body><h1>Item 1</h1></body></html>", "text/html"),
        )
        .mount(&mock_server)
        .await;

    // Not HTML
    Mock::given(method("GET"))
        .and(path("/item/2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"sku": 2}"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    // /item/3 is unmounted and answers 404

    let user_agent = UserAgentSettings {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0".to_string(),
        contact_url: None,
    };
    let fetcher = HttpPageFetcher::new(&user_agent, Duration::from_secs(5)).unwrap();
    let engine = CrawlEngine::new(
        Arc::new(fetcher),
        Arc::new(ObjectStoreSink::in_memory()),
        EngineSettings::default(),
    );

    let config = CrawlConfig {
        start_urls: vec![format!("{}/", base_url)],
        ..shop_config()
    };
    let summary = engine.run(&config).await.unwrap();

    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.pages_processed, 1);
    assert_eq!(summary.products_persisted, 1);
    assert_eq!(summary.urls_abandoned, 2);
}

#[tokio::test]
async fn test_products_are_written_to_local_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ObjectStoreSink::local(dir.path()).unwrap();
    let fetcher = Arc::new(MapFetcher::new(&shop_pages(product_links(2), 2)));
    let engine = create_engine(fetcher, Arc::new(sink));

    let summary = engine.run(&shop_config()).await.unwrap();
    assert_eq!(summary.products_persisted, 2);

    let stored: Vec<_> = std::fs::read_dir(dir.path().join("products"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|name| name.ends_with(".html")));
}
