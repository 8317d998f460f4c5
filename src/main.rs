//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner crawl-and-enrich engine.

use anyhow::Context;
use clap::Parser;
use gleaner::config::{apply_env_overrides, load_config_with_hash, validate, Config};
use gleaner::crawler::{run_crawl, CrawlOptions};
use gleaner::output::{self, SqliteExporter};
use gleaner::state::SanitizePolicy;
use gleaner::storage::JsonStore;
use gleaner::url::render_list_url;
use gleaner::WorkCoordinate;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Gleaner: a resumable crawl-and-enrich engine
///
/// Gleaner walks paginated listing pages partition by partition, enriches
/// every item from its detail page, and checkpoints everything to a single
/// JSON document so an interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version = "1.0.0")]
#[command(about = "A resumable crawl-and-enrich engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, ignoring previous state
    #[arg(long)]
    fresh: bool,

    /// Validate config and show the coordinate plan without crawling
    #[arg(long, group = "mode")]
    dry_run: bool,

    /// Show statistics from the state document and exit
    #[arg(long, group = "mode")]
    stats: bool,

    /// Write a markdown summary of the state document and exit
    #[arg(long, group = "mode")]
    export_summary: bool,

    /// Export records and completed pages to a SQLite database and exit
    #[arg(long, value_name = "PATH", group = "mode")]
    export_sqlite: Option<PathBuf>,

    /// Drop unresolved records and reopen their pages, then exit
    #[arg(long, group = "mode")]
    clean: bool,

    /// Merge state documents into the configured state path, then exit
    #[arg(long, value_name = "FILES", num_args = 1.., group = "mode")]
    organize: Vec<PathBuf>,

    /// Report on every file in the backup chain and exit
    #[arg(long, group = "mode")]
    recover: bool,

    /// List records matching every term (case-insensitive) and exit
    #[arg(long, value_name = "TERMS", num_args = 1.., group = "mode")]
    search: Vec<String>,

    /// Maximum number of search matches to print
    #[arg(long, value_name = "N", default_value_t = output::DEFAULT_SEARCH_LIMIT, requires = "search")]
    limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load(&cli)?;

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.export_summary {
        handle_export_summary(&config)?;
    } else if let Some(path) = &cli.export_sqlite {
        handle_export_sqlite(&config, path, config_hash.as_deref())?;
    } else if cli.clean {
        handle_clean(&config)?;
    } else if !cli.organize.is_empty() {
        handle_organize(&config, &cli.organize)?;
    } else if cli.recover {
        handle_recover(&config);
    } else if !cli.search.is_empty() {
        handle_search(&config, &cli.search, cli.limit)?;
    } else {
        let code = handle_crawl(config, cli.fresh).await;
        std::process::exit(code);
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("gleaner=info,warn"),
                1 => EnvFilter::new("gleaner=debug,info"),
                2 => EnvFilter::new("gleaner=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the config file (if any), then applies environment overrides
fn load(cli: &Cli) -> anyhow::Result<(Config, Option<String>)> {
    let (config, hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, Some(hash))
        }
        None => {
            tracing::info!("No configuration file given; using built-in defaults");
            let config = Config::default();
            validate(&config).context("Built-in configuration is invalid")?;
            (config, None)
        }
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    Ok((config, hash))
}

fn store(config: &Config) -> JsonStore {
    JsonStore::from_config(&config.output, config.partition_order())
}

fn sanitize_policy(config: &Config) -> SanitizePolicy {
    SanitizePolicy {
        lenient: config.fetch.is_lenient(),
        anonymous_name: config.site.anonymous_name.clone(),
        anonymous_markers: config.site.anonymous_markers.clone(),
    }
}

/// Handles the --dry-run mode: validates config and shows the coordinate plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Gleaner Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Page concurrency: {}", config.crawler.page_concurrency);
    println!("  Item concurrency: {}", config.crawler.item_concurrency);
    println!("  Request delay: {}ms", config.crawler.request_delay_ms);
    println!(
        "  Detail attempts: {} ({:?} backoff, {}ms base)",
        config.fetch.max_attempts, config.fetch.backoff, config.fetch.backoff_ms
    );
    println!("  On exhausted: {:?}", config.fetch.on_exhausted);
    println!(
        "  Quality gate: failure ratio < {}",
        config.quality.max_failure_ratio
    );
    println!(
        "  Circuit breaker: more than {} consecutive failures below {:.0}% success, {}s cooldown",
        config.breaker.failure_threshold,
        config.breaker.success_floor * 100.0,
        config.breaker.cooldown_secs
    );

    println!("\nOutput:");
    println!("  State: {}", config.output.state_path.display());
    println!("  Backup: {}", config.output.effective_backup_path().display());
    println!("  Snapshots: {}", config.output.effective_snapshot_dir().display());
    println!("  Summary: {}", config.output.summary_path.display());

    let partitions = config.effective_partitions();
    println!("\nPartitions ({}):", partitions.len());
    for entry in &partitions {
        let range = match entry.last_page {
            Some(last) => format!("pages {}..={}", entry.first_page, last),
            None => format!("pages {}.. until no results", entry.first_page),
        };
        let first = render_list_url(
            &config.site.list_url,
            &WorkCoordinate::new(entry.name.clone(), entry.first_page),
        )?;
        println!("  - {:<6} {:<28} {}", entry.name, range, first);
    }

    println!("\n✓ Configuration is valid");
    let bounded: Option<u32> = partitions.iter().map(|p| p.page_count()).sum();
    match bounded {
        Some(total) => println!("✓ Would scan up to {} list pages", total),
        None => println!("✓ Would scan until every open-ended partition reports no results"),
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the state document
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("State: {}\n", config.output.state_path.display());

    let stats = output::load_statistics(&store(config), &config.effective_partitions())?;
    output::print_statistics(&stats);

    Ok(())
}

/// Handles the --export-summary mode: generates markdown summary
fn handle_export_summary(config: &Config) -> anyhow::Result<()> {
    println!("=== Exporting Crawl Summary ===\n");
    println!("State: {}", config.output.state_path.display());
    println!("Output: {}", config.output.summary_path.display());
    println!();

    let stats = output::load_statistics(&store(config), &config.effective_partitions())?;
    output::generate_markdown_summary(&stats, &config.output.summary_path)?;

    println!("✓ Summary exported to: {}", config.output.summary_path.display());

    Ok(())
}

/// Handles the --export-sqlite mode
fn handle_export_sqlite(
    config: &Config,
    path: &std::path::Path,
    config_hash: Option<&str>,
) -> anyhow::Result<()> {
    use gleaner::StateStore;

    let state = store(config).load()?;
    let mut exporter = SqliteExporter::new(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let summary = exporter.export(&state, config_hash)?;

    println!(
        "✓ Exported {} records and {} completed pages to {}",
        summary.records,
        summary.coordinates,
        path.display()
    );
    Ok(())
}

/// Handles the --clean mode
fn handle_clean(config: &Config) -> anyhow::Result<()> {
    let report = output::clean(&store(config), &sanitize_policy(config))?;
    println!(
        "✓ Removed {} unresolved records; {} pages reopened",
        report.dropped, report.reopened
    );
    Ok(())
}

/// Handles the --organize mode
fn handle_organize(config: &Config, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let report = output::organize(inputs, &store(config), &sanitize_policy(config))?;
    println!(
        "✓ Merged {} files: {} records ({} upgraded, {} duplicates, {} backfilled, {} dropped), {} completed pages",
        report.files,
        report.records,
        report.merge.upgraded,
        report.merge.skipped,
        report.backfilled,
        report.dropped,
        report.coordinates
    );
    println!("  Written to {}", config.output.state_path.display());
    Ok(())
}

/// Handles the --recover mode
fn handle_recover(config: &Config) {
    output::print_recovery(&output::recover(&store(config)));
}

/// Handles the --search mode
fn handle_search(config: &Config, keywords: &[String], limit: usize) -> anyhow::Result<()> {
    use gleaner::StateStore;

    let state = store(config)
        .load()
        .with_context(|| format!("Failed to read {}", config.output.state_path.display()))?;
    let matches = output::search(&state, keywords, limit);
    output::print_search_results(keywords, &matches);
    Ok(())
}

/// Handles the main crawl operation, returning the process exit code
async fn handle_crawl(config: Config, fresh: bool) -> i32 {
    tracing::info!(
        partitions = ?config.partition_order(),
        page_concurrency = config.crawler.page_concurrency,
        item_concurrency = config.crawler.item_concurrency,
        "Starting crawl"
    );

    match run_crawl(config, CrawlOptions { fresh }).await {
        Ok(report) => {
            tracing::info!("Crawl {}", report.status);
            report.status.exit_code()
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            1
        }
    }
}
