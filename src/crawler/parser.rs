//! HTML evaluation for fetched pages
//!
//! This module evaluates a page's HTML to extract:
//! - Links to follow (from `<a>` tags)
//! - Elements matched by a CSS selector (product cards)
//! - Actionable controls (the "next page" link)
//!
//! `scraper::Html` is not `Send`, so every function parses the document,
//! evaluates it and returns owned values before any await point.

use crate::crawler::fetcher::{ControlHandle, ElementHandle, FetchError};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Parses a CSS selector, reporting failures as fetch errors
pub fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|e| FetchError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Extracts all followable links from an HTML document
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
///
/// # Returns
///
/// Absolute links in document order, duplicates included
///
/// # Example
///
/// ```
/// use shelf_crawl::crawler::extract_links;
/// use url::Url;
///
/// let html = r#"<html><body><a href="/item/1">Boots</a></body></html>"#;
/// let base_url = Url::parse("https://shop.test/cat").unwrap();
/// let links = extract_links(html, &base_url);
/// assert_eq!(links[0].as_str(), "https://shop.test/item/1");
/// ```
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(a_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&a_selector)
        .filter(|element| element.value().attr("download").is_none())
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .collect()
}

/// Returns true if `selector` matches anything in the document
pub fn has_match(html: &str, selector: &str) -> Result<bool, FetchError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// Collects every element matching `selector`
pub fn select_elements(html: &str, selector: &str) -> Result<Vec<ElementHandle>, FetchError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    let elements = document
        .select(&selector)
        .map(|element| ElementHandle::new(element.html()))
        .collect();
    Ok(elements)
}

/// Locates the first element matching `selector` as a control
pub fn locate_control(html: &str, selector: &str) -> Result<Option<ControlHandle>, FetchError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);

    let control = document.select(&parsed).next().map(|element| ControlHandle {
        selector: selector.to_string(),
        href: element.value().attr("href").map(|h| h.trim().to_string()),
        text: element.text().collect::<String>().trim().to_string(),
        disabled: is_disabled(&element),
    });
    Ok(control)
}

/// Finds the first link inside an HTML fragment
///
/// Selectors are tried in order; the first one yielding an `href` wins.
pub fn first_link_in(fragment: &str, selectors: &[String]) -> Option<String> {
    let document = Html::parse_fragment(fragment);

    selectors.iter().find_map(|selector| {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .map(str::trim)
            .find(|href| !href.is_empty())
            .map(str::to_string)
    })
}

/// Checks the markers shops use for an inactive "next" control
fn is_disabled(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    value.attr("disabled").is_some()
        || value.attr("aria-disabled") == Some("true")
        || value.classes().any(|class| class == "disabled")
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
        Some(absolute_url)
    } else {
        None
    }
}
