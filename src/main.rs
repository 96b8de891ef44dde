//! Shelf-Crawl main entry point
//!
//! This is the command-line interface for the Shelf-Crawl catalogue crawler.

use anyhow::{bail, Context};
use clap::Parser;
use shelf_crawl::config::{
    compute_config_hash, load_crawl_config, load_settings, validate_and_apply_defaults,
    validate_settings, CrawlConfig, Settings,
};
use shelf_crawl::crawler::HttpPageFetcher;
use shelf_crawl::output::{ArtifactSink, ObjectStoreSink};
use shelf_crawl::queue::{JobQueue, JobResult};
use shelf_crawl::state::JobState;
use shelf_crawl::storage::{open_storage, JobStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Longest a crawl is waited on before the CLI gives up
const RUN_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Grace period for in-flight pages after Ctrl-C
const CANCEL_WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Shelf-Crawl: an e-commerce catalogue crawler
///
/// Shelf-Crawl walks the listing pages of a shop, follows pagination, and
/// stores every product page it finds for downstream extraction.
#[derive(Parser, Debug)]
#[command(name = "shelf-crawl")]
#[command(version)]
#[command(about = "An e-commerce catalogue crawler", long_about = None)]
struct Cli {
    /// Path to the JSON crawl configuration
    #[arg(value_name = "CRAWL_CONFIG", required_unless_present = "status")]
    crawl_config: Option<PathBuf>,

    /// Path to the TOML service settings
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and show what would be crawled
    #[arg(long, conflicts_with = "status")]
    dry_run: bool,

    /// Show the state of a job from the database and exit
    #[arg(long, value_name = "JOB_ID")]
    status: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let settings = match &cli.settings {
        Some(path) => {
            tracing::info!("Loading settings from: {}", path.display());
            load_settings(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?
        }
        None => {
            let settings = Settings::default();
            validate_settings(&settings)?;
            settings
        }
    };

    if let Some(job_id) = &cli.status {
        return handle_status(&settings, job_id);
    }

    let Some(config_path) = &cli.crawl_config else {
        bail!("a crawl configuration is required");
    };
    let config = load_crawl_config(config_path)
        .with_context(|| format!("failed to load crawl config from {}", config_path.display()))?;

    if cli.dry_run {
        handle_dry_run(&settings, &config)
    } else {
        handle_crawl(&settings, &config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelf_crawl=info,warn"),
            1 => EnvFilter::new("shelf_crawl=debug,info"),
            2 => EnvFilter::new("shelf_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --status mode: prints a job's state and result
fn handle_status(settings: &Settings, job_id: &str) -> anyhow::Result<()> {
    let store = open_storage(Path::new(&settings.output.database_path))?;
    let job = store
        .get_job(job_id)
        .with_context(|| format!("no job {} in {}", job_id, settings.output.database_path))?;

    println!("Job {}", job.id);
    println!("  State:    {}", job.state);
    println!("  Attempts: {}", job.attempts);
    println!("  Created:  {}", job.created_at);
    println!("  Updated:  {}", job.updated_at);
    if job.stalled_count > 0 {
        println!("  Stalls:   {}", job.stalled_count);
    }

    match JobResult::from(&job) {
        JobResult::Completed(summary) => println!("\n{}", summary),
        JobResult::Failed(error) => println!("  Error:    {}", error),
        JobResult::Pending(_) => {
            if let Some(error) = &job.error {
                println!("  Last error: {}", error);
            }
        }
    }

    let mut counts = Vec::new();
    for state in JobState::all_states() {
        counts.push(format!("{} {}", store.count_jobs_by_state(state)?, state));
    }
    println!("\nJob store: {}", counts.join(", "));

    Ok(())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(settings: &Settings, config: &CrawlConfig) -> anyhow::Result<()> {
    let config = validate_and_apply_defaults(config)?;
    let hash = compute_config_hash(&config)?;

    println!("=== Shelf-Crawl Dry Run ===\n");

    println!("Crawl Configuration (hash: {}):", hash);
    println!("  Max pages: {}", config.max_pages());
    println!("  Fetch ceiling: {}", config.fetch_ceiling());
    println!("  Product card selector: {}", config.product_card_selector);
    if !config.pagination_selector.is_empty() {
        println!("  Pagination selector: {}", config.pagination_selector);
    }
    println!(
        "  Product link selectors: {}",
        config.product_link_selectors.join(", ")
    );

    println!("\nListing URL patterns ({}):", config.listing_url_patterns.len());
    for pattern in &config.listing_url_patterns {
        println!("  - {}", pattern);
    }

    println!("\nProduct URL patterns ({}):", config.product_url_patterns.len());
    for pattern in &config.product_url_patterns {
        println!("  - {}", pattern);
    }

    println!("\nEngine:");
    println!("  Workers: {}", settings.engine.workers);
    println!("  Page timeout: {}ms", settings.engine.page_timeout_ms);
    println!("  User agent: {}", settings.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", settings.output.database_path);
    match &settings.output.artifact_dir {
        Some(dir) => println!("  Artifacts: {}", dir),
        None => println!("  Artifacts: in memory (discarded on exit)"),
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling from {} start URLs",
        config.start_urls.len()
    );

    Ok(())
}

/// Handles the main crawl operation: submits one job and waits for it
async fn handle_crawl(settings: &Settings, config: &CrawlConfig) -> anyhow::Result<()> {
    let store = open_storage(Path::new(&settings.output.database_path))?;

    let sink: Arc<dyn ArtifactSink> = match &settings.output.artifact_dir {
        Some(dir) => Arc::new(ObjectStoreSink::local(Path::new(dir))?),
        None => {
            tracing::warn!("No artifact directory configured; product pages are kept in memory");
            Arc::new(ObjectStoreSink::in_memory())
        }
    };

    let page_timeout = Duration::from_millis(settings.engine.page_timeout_ms);
    let fetcher = HttpPageFetcher::new(&settings.user_agent, page_timeout)?;

    let queue = JobQueue::new(
        Arc::new(Mutex::new(store)),
        Arc::new(fetcher),
        sink,
        settings.queue.clone(),
        settings.engine.clone(),
    );
    queue.start()?;

    let job_id = queue.submit(config)?;
    println!("Submitted job {}", job_id);

    let result = tokio::select! {
        result = queue.wait_for(&job_id, RUN_WAIT_LIMIT) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; letting in-flight pages finish");
            queue.cancel(&job_id)?;
            queue.wait_for(&job_id, CANCEL_WAIT_LIMIT).await?
        }
    };
    queue.shutdown();

    match result {
        JobResult::Completed(summary) => {
            println!("\n{}", summary);
            Ok(())
        }
        JobResult::Failed(error) => bail!("job {} failed: {}", job_id, error),
        JobResult::Pending(state) => bail!("job {} is still {}", job_id, state),
    }
}
