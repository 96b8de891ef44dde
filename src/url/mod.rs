//! URL handling module for Shelf-Crawl
//!
//! This module provides URL normalization, host extraction and the pattern
//! matcher that classifies pages as listings or products.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, same_host};
pub use matcher::{Classification, PatternMatcher};
pub use normalize::{normalize_url, resolve_and_normalize};
