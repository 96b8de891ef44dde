//! Page fetching collaborator
//!
//! This module defines how the crawler talks to whatever loads pages:
//! - `PageFetcher`: loads a URL and follows navigation controls
//! - `PageHandle`: evaluates a loaded page (links, selectors, controls)
//! - `HttpPageFetcher`: reqwest-backed implementation over static HTML
//!
//! Every error a fetcher reports is local to the URL being handled.

use crate::config::UserAgentSettings;
use crate::crawler::parser;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors reported while loading or evaluating a page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out after {after:?} loading {url}")]
    Timeout { url: String, after: Duration },

    #[error("Selector '{selector}' did not appear on {url} within {after:?}")]
    SelectorTimeout {
        url: String,
        selector: String,
        after: Duration,
    },

    #[error("Navigation from {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Expected HTML from {url}, got '{content_type}'")]
    ContentMismatch { url: String, content_type: String },

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Returns true for either kind of timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::SelectorTimeout { .. })
    }
}

/// An element matched on a page, detached from its document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    outer_html: String,
}

impl ElementHandle {
    pub fn new(outer_html: impl Into<String>) -> Self {
        Self {
            outer_html: outer_html.into(),
        }
    }

    pub fn outer_html(&self) -> &str {
        &self.outer_html
    }

    /// Returns the first link inside the element matched by `selectors`
    pub fn link(&self, selectors: &[String]) -> Option<String> {
        parser::first_link_in(&self.outer_html, selectors)
    }
}

/// A control located on a page, such as a "next page" link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    /// Selector the control was located by
    pub selector: String,
    pub href: Option<String>,
    pub text: String,
    pub disabled: bool,
}

impl ControlHandle {
    /// Returns true if following the control can lead somewhere
    pub fn is_actionable(&self) -> bool {
        !self.disabled && self.href.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// A loaded page
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// URL the page was loaded from, after redirects
    fn url(&self) -> &Url;

    /// Raw page content
    async fn content(&self) -> Result<String, FetchError>;

    /// Absolute links found on the page
    async fn links(&self) -> Result<Vec<Url>, FetchError>;

    /// Every element matching `selector`
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>, FetchError>;

    /// The first element matching `selector`, as a control
    async fn locate(&self, selector: &str) -> Result<Option<ControlHandle>, FetchError>;

    /// Waits up to `timeout` for `selector` to match
    ///
    /// Fails with [`FetchError::SelectorTimeout`] when it never does.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), FetchError>;
}

/// Loads pages for the crawler
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Loads `url`
    async fn fetch(&self, url: &Url) -> Result<Box<dyn PageHandle>, FetchError>;

    /// Follows `control` from `page`
    ///
    /// The default resolves the control's link against the page URL and
    /// loads it.
    async fn navigate(
        &self,
        page: &dyn PageHandle,
        control: &ControlHandle,
    ) -> Result<Box<dyn PageHandle>, FetchError> {
        let href = control.href.as_deref().ok_or_else(|| FetchError::Navigation {
            url: page.url().to_string(),
            message: format!("control '{}' has no link", control.selector),
        })?;

        let target = page.url().join(href).map_err(|e| FetchError::Navigation {
            url: page.url().to_string(),
            message: format!("bad link '{}': {}", href, e),
        })?;

        self.fetch(&target).await
    }
}

/// Runs a page operation under `after`, reporting expiry as a timeout on `url`
pub async fn with_page_timeout<T, F>(url: &Url, after: Duration, operation: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::time::timeout(after, operation)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            after,
        })?
}

/// A page whose HTML is fully loaded up front
///
/// Selectors are evaluated against the HTML as served, so a missing selector
/// is reported immediately rather than after waiting.
#[derive(Debug, Clone)]
pub struct StaticPage {
    url: Url,
    html: String,
}

impl StaticPage {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }
}

#[async_trait]
impl PageHandle for StaticPage {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn content(&self) -> Result<String, FetchError> {
        Ok(self.html.clone())
    }

    async fn links(&self) -> Result<Vec<Url>, FetchError> {
        Ok(parser::extract_links(&self.html, &self.url))
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>, FetchError> {
        parser::select_elements(&self.html, selector)
    }

    async fn locate(&self, selector: &str) -> Result<Option<ControlHandle>, FetchError> {
        parser::locate_control(&self.html, selector)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), FetchError> {
        if parser::has_match(&self.html, selector)? {
            Ok(())
        } else {
            Err(FetchError::SelectorTimeout {
                url: self.url.to_string(),
                selector: selector.to_string(),
                after: timeout,
            })
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent settings
/// * `timeout` - Bound on a whole request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &UserAgentSettings, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetcher issuing plain GET requests
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpPageFetcher {
    /// Creates a fetcher identifying itself with `user_agent`
    pub fn new(user_agent: &UserAgentSettings, timeout: Duration) -> Result<Self, FetchError> {
        let client = build_http_client(user_agent, timeout)?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    /// # Request Flow
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | Non-2xx status | `Status` |
    /// | Content-Type not HTML | `ContentMismatch` |
    /// | Request timeout | `Timeout` |
    /// | Connection or body error | `Network` |
    async fn fetch(&self, url: &Url) -> Result<Box<dyn PageHandle>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.contains("text/html") {
            return Err(FetchError::ContentMismatch {
                url: url.to_string(),
                content_type,
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| self.classify(url, e))?;

        tracing::debug!(url = %final_url, bytes = body.len(), "Fetched page");

        Ok(Box::new(StaticPage::new(final_url, body)))
    }
}

impl HttpPageFetcher {
    fn classify(&self, url: &Url, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else if error.is_connect() {
            FetchError::Network {
                url: url.to_string(),
                message: "Connection refused".to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}
