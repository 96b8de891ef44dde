use crate::config::types::{CrawlConfig, EngineSettings, QueueSettings, Settings, UserAgentSettings};
use crate::url::PatternMatcher;
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Link selector used when a crawl config names none
pub const DEFAULT_PRODUCT_LINK_SELECTOR: &str = "a[href]";

/// Validates a crawl config and fills in defaults
///
/// Runs once, before a crawl starts. The returned config is the one the
/// engine crawls with.
///
/// # Arguments
///
/// * `config` - The submitted crawl configuration
///
/// # Returns
///
/// * `Ok(CrawlConfig)` - The validated config with defaults applied
/// * `Err(ConfigError)` - The config is empty or violates an invariant
pub fn validate_and_apply_defaults(config: &CrawlConfig) -> Result<CrawlConfig, ConfigError> {
    if config.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut config = config.clone();

    validate_start_urls(&config.start_urls)?;

    if config.product_card_selector.trim().is_empty() {
        return Err(ConfigError::Validation(
            "productCardSelector cannot be empty".to_string(),
        ));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "maxPages must be greater than 0".to_string(),
        ));
    }

    // Compiling the matcher checks every pattern
    PatternMatcher::new(&config)?;

    if config.product_link_selectors.is_empty() {
        config.product_link_selectors = vec![DEFAULT_PRODUCT_LINK_SELECTOR.to_string()];
    }

    validate_selector(&config.product_card_selector)?;
    if !config.pagination_selector.trim().is_empty() {
        validate_selector(&config.pagination_selector)?;
    }
    for selector in &config.product_link_selectors {
        validate_selector(selector)?;
    }

    Ok(config)
}

/// Validates service settings
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    validate_engine_settings(&settings.engine)?;
    validate_queue_settings(&settings.queue)?;
    validate_user_agent_settings(&settings.user_agent)?;

    if settings.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_start_urls(urls: &[String]) -> Result<(), ConfigError> {
    if urls.is_empty() {
        return Err(ConfigError::Validation(
            "startUrls must contain at least one URL".to_string(),
        ));
    }

    for raw in urls {
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", raw, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Start URL '{}' must use HTTP or HTTPS",
                raw
            )));
        }
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

fn validate_engine_settings(engine: &EngineSettings) -> Result<(), ConfigError> {
    if engine.workers < 1 || engine.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            engine.workers
        )));
    }

    if engine.page_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "page-timeout-ms must be >= 100ms, got {}ms",
            engine.page_timeout_ms
        )));
    }

    if engine.root_link_limit < 1 {
        return Err(ConfigError::Validation(
            "root-link-limit must be >= 1".to_string(),
        ));
    }

    if engine.artifact_prefix.trim_matches('/').is_empty() {
        return Err(ConfigError::Validation(
            "artifact-prefix cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_queue_settings(queue: &QueueSettings) -> Result<(), ConfigError> {
    if queue.concurrency < 1 {
        return Err(ConfigError::Validation(
            "concurrency must be >= 1".to_string(),
        ));
    }

    if queue.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1".to_string(),
        ));
    }

    if queue.heartbeat_interval_ms == 0 || queue.heartbeat_interval_ms >= queue.stalled_interval_ms
    {
        return Err(ConfigError::Validation(format!(
            "heartbeat-interval-ms ({}) must be positive and below stalled-interval-ms ({})",
            queue.heartbeat_interval_ms, queue.stalled_interval_ms
        )));
    }

    Ok(())
}

fn validate_user_agent_settings(ua: &UserAgentSettings) -> Result<(), ConfigError> {
    if ua.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !ua
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            ua.crawler_name
        )));
    }

    if let Some(contact) = &ua.contact_url {
        Url::parse(contact)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;
    }

    Ok(())
}
