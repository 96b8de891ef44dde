use crate::config::CrawlConfig;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Page classification derived from the crawl's URL patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Category or search page enumerating products
    Listing,
    /// Leaf page whose content is persisted
    Product,
    /// Matches neither pattern set
    Unclassified,
}

/// Classifies URLs against a crawl's listing and product patterns
///
/// Patterns are whole-string regular expressions. A pattern matches a URL if
/// it matches the entire normalized URL, the entire path, or the entire
/// path-plus-query. That lets a config say either `/item/\d+` or
/// `https://shop\.test/item/\d+`.
///
/// When a URL matches both sets, it is a listing: hub pages are traversed
/// before anything beneath them is trusted as a product.
///
/// # Examples
///
/// ```
/// use shelf_crawl::url::{Classification, PatternMatcher};
/// use url::Url;
///
/// let matcher = PatternMatcher::from_patterns(&["/cat".to_string()], &[r"/item/\d+".to_string()]).unwrap();
///
/// let url = Url::parse("https://shop.test/item/12").unwrap();
/// assert_eq!(matcher.classify(&url), Classification::Product);
///
/// let url = Url::parse("https://shop.test/item/12/reviews").unwrap();
/// assert_eq!(matcher.classify(&url), Classification::Unclassified);
/// ```
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    listing: Vec<Regex>,
    product: Vec<Regex>,
}

impl PatternMatcher {
    /// Compiles the patterns of a crawl configuration
    pub fn new(config: &CrawlConfig) -> Result<Self, ConfigError> {
        Self::from_patterns(&config.listing_url_patterns, &config.product_url_patterns)
    }

    /// Compiles listing and product pattern sets
    pub fn from_patterns(listing: &[String], product: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            listing: compile_all(listing)?,
            product: compile_all(product)?,
        })
    }

    /// Classifies a URL
    pub fn classify(&self, url: &Url) -> Classification {
        let candidates = candidates(url);

        if matches_any(&self.listing, &candidates) {
            Classification::Listing
        } else if matches_any(&self.product, &candidates) {
            Classification::Product
        } else {
            Classification::Unclassified
        }
    }
}

/// Compiles each pattern anchored to the whole input
fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
        })
        .collect()
}

/// The forms of a URL a pattern may match in full
fn candidates(url: &Url) -> Vec<String> {
    let mut forms = vec![url.as_str().to_string(), url.path().to_string()];
    if let Some(query) = url.query() {
        forms.push(format!("{}?{}", url.path(), query));
    }
    forms
}

fn matches_any(patterns: &[Regex], candidates: &[String]) -> bool {
    patterns
        .iter()
        .any(|re| candidates.iter().any(|candidate| re.is_match(candidate)))
}
