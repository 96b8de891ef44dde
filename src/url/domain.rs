use url::Url;

/// Extracts the domain from a URL
///
/// Returns the lowercase host, or `None` for URLs without a host.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use shelf_crawl::url::extract_domain;
///
/// let url = Url::parse("https://SHOP.TEST/cat").unwrap();
/// assert_eq!(extract_domain(&url), Some("shop.test".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if both URLs point at the same host
///
/// Links discovered on seed pages are only followed when they stay on the
/// seed's host.
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (extract_domain(a), extract_domain(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
