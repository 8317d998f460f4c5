//! Crawl coordinator - wires configuration, store, renderer, and scheduler
//!
//! The coordinator loads the persisted state (falling back through the backup
//! chain), cleans it for resumption, and hands it to the scheduler. It also
//! owns signal handling for the binary.

use crate::config::Config;
use crate::crawler::report::RunReport;
use crate::crawler::scheduler::CrawlScheduler;
use crate::output::{CommandHook, DiagnosticsWriter};
use crate::renderer::{HttpRenderer, Renderer};
use crate::state::{CrawlState, Merger, SanitizePolicy};
use crate::storage::{JsonStore, LoadSource, StorageError};
use crate::GleanError;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Options chosen on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlOptions {
    /// Ignore any persisted state and start from scratch
    pub fresh: bool,
}

/// Main crawler coordinator structure
pub struct Coordinator<R: Renderer> {
    scheduler: CrawlScheduler<R>,
    load_source: LoadSource,
}

impl<R: Renderer> Coordinator<R> {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `renderer` - Backend used for every page load
    /// * `options` - Fresh or resumed start
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(GleanError::CorruptState)` - Every file in the backup chain is unreadable
    pub fn new(config: Config, renderer: R, options: CrawlOptions) -> Result<Self, GleanError> {
        let store = Arc::new(JsonStore::from_config(&config.output, config.partition_order()));

        let (state, load_source) = if options.fresh {
            info!("Starting fresh crawl (ignoring previous state)");
            (CrawlState::new(), LoadSource::Fresh)
        } else {
            match store.load_with_fallback(config.output.allow_empty_fallback) {
                Ok(report) => (report.state, report.source),
                Err(StorageError::ChainExhausted(detail)) => {
                    return Err(GleanError::CorruptState(detail))
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut merger = Merger::new(state);
        merger.backfill_categories();
        let sanitized = merger.sanitize(&SanitizePolicy {
            lenient: config.fetch.is_lenient(),
            anonymous_name: config.site.anonymous_name.clone(),
            anonymous_markers: config.site.anonymous_markers.clone(),
        });
        if sanitized.normalized > 0 || sanitized.described > 0 {
            info!(
                normalized = sanitized.normalized,
                described = sanitized.described,
                "Cleaned persisted records"
            );
        }

        info!(
            source = ?load_source,
            records = merger.len(),
            completed = merger.state().completed.len(),
            "Crawl state loaded from {}",
            store.path().display()
        );

        let state_path = store.path().to_path_buf();
        let diagnostics = DiagnosticsWriter::new(config.output.diagnostics_dir.clone());
        let hook = CommandHook::from_config(&config.sync);

        let mut scheduler =
            CrawlScheduler::from_config(config, renderer, store, merger)?.with_diagnostics(diagnostics);
        if let Some(hook) = hook {
            scheduler = scheduler.with_hook(Arc::new(hook), state_path);
        }

        Ok(Self {
            scheduler,
            load_source,
        })
    }

    /// Where the starting state came from
    pub fn load_source(&self) -> &LoadSource {
        &self.load_source
    }

    pub fn scheduler(&self) -> &CrawlScheduler<R> {
        &self.scheduler
    }

    /// Runs the crawl, then shuts the renderer pool down
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<RunReport, GleanError> {
        let result = self.scheduler.run(shutdown).await;
        self.scheduler.pool().shutdown().await;
        result
    }
}

/// Runs a crawl with the HTTP renderer until done or interrupted
///
/// Ctrl-C (and SIGTERM on unix) request a graceful stop: in-flight work gets
/// the configured grace period and a final checkpoint is written.
///
/// # Example
///
/// ```no_run
/// use gleaner::config::load_config;
/// use gleaner::crawler::{run_crawl, CrawlOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("gleaner.toml"))?;
/// let report = run_crawl(config, CrawlOptions::default()).await?;
/// std::process::exit(report.status.exit_code());
/// # }
/// ```
pub async fn run_crawl(config: Config, options: CrawlOptions) -> Result<RunReport, GleanError> {
    let renderer = HttpRenderer::new(&config.renderer)?;
    let mut coordinator = Coordinator::new(config, renderer, options)?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Interrupt received; finishing in-flight work");
        let _ = tx.send(true);
    });

    coordinator.run(rx).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
