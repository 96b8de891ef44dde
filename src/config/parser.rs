use crate::config::types::{CrawlConfig, Settings};
use crate::config::validation::validate_settings;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates service settings from a TOML file
///
/// # Arguments
///
/// * `path` - Path to the TOML settings file
///
/// # Returns
///
/// * `Ok(Settings)` - Successfully loaded and validated settings
/// * `Err(ConfigError)` - Failed to load, parse, or validate the settings
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use shelf_crawl::config::load_settings;
///
/// let settings = load_settings(Path::new("shelf-crawl.toml")).unwrap();
/// println!("Workers: {}", settings.engine.workers);
/// ```
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Parses a crawl config from its JSON payload
///
/// Only parses; validation happens in
/// [`validate_and_apply_defaults`](crate::config::validate_and_apply_defaults)
/// when the job is submitted.
pub fn parse_crawl_config(json: &str) -> Result<CrawlConfig, ConfigError> {
    if json.trim().is_empty() {
        return Err(ConfigError::Empty);
    }
    Ok(serde_json::from_str(json)?)
}

/// Reads and parses a crawl config JSON file
pub fn load_crawl_config(path: &Path) -> Result<CrawlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_crawl_config(&content)
}

/// Computes a SHA-256 fingerprint of a crawl config
///
/// The config is hashed in its serialized JSON form, so two submissions of
/// the same crawl share a hash regardless of payload formatting.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash
/// * `Err(ConfigError)` - The config could not be serialized
pub fn compute_config_hash(config: &CrawlConfig) -> Result<String, ConfigError> {
    let canonical = serde_json::to_string(config)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
