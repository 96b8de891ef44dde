//! Configuration module for Shelf-Crawl
//!
//! Two kinds of configuration live here: the per-crawl [`CrawlConfig`]
//! submitted with each job as JSON, and the service [`Settings`] loaded from
//! a TOML file.
//!
//! # Example
//!
//! ```no_run
//! use shelf_crawl::config::{load_crawl_config, validate_and_apply_defaults};
//! use std::path::Path;
//!
//! let config = load_crawl_config(Path::new("crawl.json")).unwrap();
//! let config = validate_and_apply_defaults(&config).unwrap();
//! println!("Fetch ceiling: {}", config.fetch_ceiling());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CrawlConfig, EngineSettings, OutputSettings, QueueSettings, Settings, UserAgentSettings,
    DEFAULT_MAX_PAGES,
};

// Re-export parser and validation functions
pub use parser::{compute_config_hash, load_crawl_config, load_settings, parse_crawl_config};
pub use validation::{
    validate_and_apply_defaults, validate_settings, DEFAULT_PRODUCT_LINK_SELECTOR,
};
