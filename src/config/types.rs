use serde::{Deserialize, Serialize};

/// Default page budget when a crawl config does not set `maxPages`
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Per-crawl configuration, as submitted with a job
///
/// Field names follow the JSON payload accepted at the job boundary, so the
/// struct serializes camelCase. The older payload names are accepted as
/// aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlConfig {
    /// Seed URLs, dispatched on the default route
    pub start_urls: Vec<String>,

    /// Patterns identifying listing (category/search) pages
    #[serde(alias = "productListingUrlPatterns")]
    pub listing_url_patterns: Vec<String>,

    /// Patterns identifying product pages
    pub product_url_patterns: Vec<String>,

    /// Selector matching one product card on a listing page
    #[serde(alias = "productCardSelectors")]
    pub product_card_selector: String,

    /// Selector of the "next page" control; empty disables pagination
    #[serde(alias = "paginationSelectors")]
    pub pagination_selector: String,

    /// Selectors tried in order to find a card's product link
    pub product_link_selectors: Vec<String>,

    /// Page budget; the fetch ceiling is twice this value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

impl CrawlConfig {
    /// Returns the page budget, applying the default
    pub fn max_pages(&self) -> u32 {
        self.max_pages.unwrap_or(DEFAULT_MAX_PAGES)
    }

    /// Returns the maximum number of fetch admissions for one crawl
    pub fn fetch_ceiling(&self) -> u64 {
        u64::from(self.max_pages()) * 2
    }

    /// Returns true if the config carries nothing to crawl
    pub fn is_empty(&self) -> bool {
        self.start_urls.is_empty()
            && self.listing_url_patterns.is_empty()
            && self.product_url_patterns.is_empty()
            && self.product_card_selector.is_empty()
    }
}

/// Service settings loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub queue: QueueSettings,
    pub output: OutputSettings,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentSettings,
}

/// Crawl engine behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Maximum number of concurrently handled pages per crawl
    pub workers: usize,

    /// Bound on each page operation (fetch, selector wait, navigation)
    pub page_timeout_ms: u64,

    /// Links examined per seed page
    pub root_link_limit: usize,

    /// Key prefix for persisted product pages
    pub artifact_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            page_timeout_ms: 10_000,
            root_link_limit: 5,
            artifact_prefix: "products".to_string(),
        }
    }
}

/// Job queue behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueSettings {
    /// Jobs run at the same time
    pub concurrency: usize,

    /// Attempts per job, the first run included
    pub max_attempts: u32,

    /// Delay before the first retry; doubles for each later one
    pub backoff_base_ms: u64,

    /// Heartbeat age after which an active job counts as stalled
    pub stalled_interval_ms: u64,

    /// How often a running job renews its heartbeat
    pub heartbeat_interval_ms: u64,

    /// Stalls tolerated before a job is failed
    pub max_stalled_count: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            stalled_interval_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            max_stalled_count: 3,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputSettings {
    /// Path to the SQLite job database
    pub database_path: String,

    /// Directory for product artifacts; in-memory when unset
    pub artifact_dir: Option<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            database_path: "./shelf-crawl.db".to_string(),
            artifact_dir: None,
        }
    }
}

/// User agent identification
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentSettings {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: Option<String>,
}

impl Default for UserAgentSettings {
    fn default() -> Self {
        Self {
            crawler_name: "ShelfCrawl".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
        }
    }
}

impl UserAgentSettings {
    /// Formats the User-Agent header value
    pub fn header_value(&self) -> String {
        match &self.contact_url {
            Some(url) => format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, url
            ),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}
