//! Crawl scheduler: dispatch, folding, checkpoints, and the circuit breaker
//!
//! The scheduler is the only owner of the [`Merger`] and therefore of the crawl
//! state. Page scans and detail fetches run as tasks in a `JoinSet`; they return
//! results and the scheduler folds them in on its own control flow.
//!
//! Two semaphores bound the work:
//! - page permits are held from the start of a scan until the page is finalized
//! - item permits are held for the duration of one detail fetch, across all pages
//!
//! Checkpoints serialize a clone of the state on the blocking pool. At most one
//! save is in flight; requests made meanwhile collapse into one follow-up save.

use crate::config::{Config, CrawlerConfig, QualityConfig};
use crate::crawler::breaker::CircuitBreaker;
use crate::crawler::detail::{DetailFetcher, FetchOutcome, FetchReport};
use crate::crawler::frontier::{Dispatch, Frontier};
use crate::crawler::report::{RunReport, RunStatus};
use crate::crawler::scanner::{ListPageScanner, ScanResult};
use crate::crawler::site::SiteRules;
use crate::output::{CheckpointHook, DiagnosticsWriter};
use crate::renderer::{Renderer, RendererPool, SessionProfile};
use crate::state::{CandidateItem, CoordinateState, Merger, Record, WorkCoordinate};
use crate::storage::{SaveOutcome, StateStore, StorageError, StorageResult};
use crate::GleanError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Page completion rule: the failure ratio must be strictly below `max_failure_ratio`
///
/// `total` counts every candidate on the page, including ones that were already
/// known and needed no fetch. A page with no candidates passes.
///
/// # Examples
///
/// ```
/// use gleaner::crawler::quality_gate_passes;
///
/// assert!(quality_gate_passes(1, 3, 0.5));
/// assert!(!quality_gate_passes(2, 3, 0.5));
/// assert!(!quality_gate_passes(2, 4, 0.5));
/// ```
pub fn quality_gate_passes(failures: usize, total: usize, max_failure_ratio: f64) -> bool {
    if total == 0 {
        return true;
    }
    (failures as f64 / total as f64) < max_failure_ratio
}

/// Result of one spawned task
enum TaskResult {
    Scan {
        coordinate: WorkCoordinate,
        attempts: u32,
        result: Result<ScanResult, GleanError>,
    },
    Item {
        coordinate: WorkCoordinate,
        item: CandidateItem,
        report: Result<FetchReport, GleanError>,
    },
}

/// A page between dispatch and finalization
struct PageWork {
    state: CoordinateState,
    total: usize,
    outstanding: usize,
    failures: usize,
    _permit: OwnedSemaphorePermit,
}

impl PageWork {
    fn advance(&mut self, coordinate: &WorkCoordinate, to: CoordinateState) -> Result<(), GleanError> {
        if !self.state.can_transition_to(to) {
            return Err(GleanError::InvalidTransition {
                coordinate: coordinate.to_string(),
                from: self.state,
                to,
            });
        }
        debug!("{}: {} -> {}", coordinate, self.state, to);
        self.state = to;
        Ok(())
    }
}

/// A checkpoint being written on the blocking pool
struct PendingSave {
    reason: &'static str,
    handle: JoinHandle<StorageResult<SaveOutcome>>,
}

/// Mutable state of a single `run` call
struct Run {
    frontier: Frontier,
    breaker: CircuitBreaker,
    page_permits: Arc<Semaphore>,
    item_permits: Arc<Semaphore>,
    pages: HashMap<WorkCoordinate, PageWork>,
    queue: VecDeque<(WorkCoordinate, CandidateItem)>,
    in_flight: HashSet<String>,
    item_backoff_until: Option<Instant>,
    /// Network-down reports per item identity
    item_outages: HashMap<String, u32>,
    /// Network-down reports per list coordinate
    scan_outages: HashMap<WorkCoordinate, u32>,
    tasks: JoinSet<TaskResult>,
    report: RunReport,
    folds_since_checkpoint: usize,
    saving: Option<PendingSave>,
    save_requested: Option<&'static str>,
}

impl Run {
    /// Earliest time something blocked may become dispatchable
    ///
    /// Only future instants count: anything already due is waiting on a permit
    /// and will be picked up when a task finishes.
    fn wake_at(&self, now: Instant) -> Option<Instant> {
        if let Some(resume) = self.breaker.resume_at(now) {
            return Some(resume);
        }
        [
            self.frontier.next_retry_at(),
            self.item_backoff_until.filter(|_| !self.queue.is_empty()),
        ]
        .into_iter()
        .flatten()
        .filter(|at| *at > now)
        .min()
    }
}

/// Resolves when the save in flight finishes; never resolves without one
async fn save_finished(
    saving: &mut Option<PendingSave>,
) -> (&'static str, Result<StorageResult<SaveOutcome>, JoinError>) {
    match saving {
        Some(save) => (save.reason, (&mut save.handle).await),
        None => std::future::pending().await,
    }
}

pub struct CrawlScheduler<R: Renderer> {
    crawler: CrawlerConfig,
    quality: QualityConfig,
    config: Config,
    pool: Arc<RendererPool<R>>,
    scanner: Arc<ListPageScanner>,
    fetcher: Arc<DetailFetcher>,
    store: Arc<dyn StateStore + Send + Sync>,
    merger: Merger,
    diagnostics: Option<DiagnosticsWriter>,
    hook: Option<(Arc<dyn CheckpointHook>, PathBuf)>,
}

impl<R: Renderer> CrawlScheduler<R> {
    pub fn new(
        config: Config,
        pool: Arc<RendererPool<R>>,
        scanner: Arc<ListPageScanner>,
        fetcher: Arc<DetailFetcher>,
        store: Arc<dyn StateStore + Send + Sync>,
        merger: Merger,
    ) -> Self {
        Self {
            crawler: config.crawler.clone(),
            quality: config.quality.clone(),
            config,
            pool,
            scanner,
            fetcher,
            store,
            merger,
            diagnostics: None,
            hook: None,
        }
    }

    /// Builds the scanner, fetcher, and renderer pool from configuration
    pub fn from_config(
        config: Config,
        renderer: R,
        store: Arc<dyn StateStore + Send + Sync>,
        merger: Merger,
    ) -> Result<Self, GleanError> {
        let rules = Arc::new(SiteRules::from_config(&config.site)?);
        let scanner = Arc::new(ListPageScanner::new(rules.clone(), &config.renderer));
        let fetcher = Arc::new(DetailFetcher::new(
            rules,
            config.fetch.clone(),
            &config.renderer,
            config.crawler.request_delay(),
        ));
        let pool = Arc::new(RendererPool::new(renderer, &config.renderer));

        Ok(Self::new(config, pool, scanner, fetcher, store, merger))
    }

    pub fn with_diagnostics(mut self, writer: DiagnosticsWriter) -> Self {
        self.diagnostics = Some(writer);
        self
    }

    /// Notifies `hook` with `state_path` after every written checkpoint
    pub fn with_hook(mut self, hook: Arc<dyn CheckpointHook>, state_path: PathBuf) -> Self {
        self.hook = Some((hook, state_path));
        self
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    pub fn into_merger(self) -> Merger {
        self.merger
    }

    pub fn pool(&self) -> &Arc<RendererPool<R>> {
        &self.pool
    }

    /// Crawls until the frontier drains or `shutdown` flips to true
    ///
    /// Always attempts a final checkpoint. A panicking task or an invalid state
    /// transition ends the run with [`GleanError::Fatal`] after that checkpoint.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunReport, GleanError> {
        let started = Instant::now();
        let mut run = Run {
            frontier: Frontier::new(&self.config.effective_partitions()),
            breaker: CircuitBreaker::new(self.config.breaker.clone()),
            page_permits: Arc::new(Semaphore::new(self.crawler.page_concurrency.max(1))),
            item_permits: Arc::new(Semaphore::new(self.crawler.item_concurrency.max(1))),
            pages: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            item_backoff_until: None,
            item_outages: HashMap::new(),
            scan_outages: HashMap::new(),
            tasks: JoinSet::new(),
            report: RunReport::new(),
            folds_since_checkpoint: 0,
            saving: None,
            save_requested: None,
        };

        info!(
            records = self.merger.len(),
            completed = self.merger.state().completed.len(),
            page_concurrency = self.crawler.page_concurrency,
            item_concurrency = self.crawler.item_concurrency,
            "Starting crawl"
        );

        let mut signals_open = true;
        let outcome: Result<RunStatus, GleanError> = loop {
            if *shutdown.borrow() {
                break Ok(RunStatus::Interrupted);
            }

            let now = Instant::now();
            if !run.breaker.is_open(now) {
                self.dispatch(&mut run, now);
            }

            let wake = run.wake_at(now);
            if run.tasks.is_empty() && wake.is_none() {
                break Ok(RunStatus::Completed);
            }

            tokio::select! {
                changed = shutdown.changed(), if signals_open => {
                    if changed.is_err() {
                        signals_open = false;
                    }
                }
                Some(joined) = run.tasks.join_next() => {
                    if let Err(e) = self.handle(&mut run, joined) {
                        break Err(e);
                    }
                }
                (reason, saved) = save_finished(&mut run.saving) => {
                    run.saving = None;
                    self.finish_checkpoint(&mut run, reason, saved);
                    if let Some(next) = run.save_requested.take() {
                        self.request_checkpoint(&mut run, next);
                    }
                }
                _ = sleep_until(wake.unwrap_or(now)), if wake.is_some() => {}
            }
        };

        let status = match &outcome {
            Ok(status) => *status,
            Err(_) => RunStatus::Failed,
        };

        if status == RunStatus::Interrupted {
            info!("Shutdown requested; waiting up to {:?} for in-flight work", self.crawler.shutdown_grace());
            self.drain(&mut run).await;
        }
        run.tasks.abort_all();

        let saved = self.final_checkpoint(&mut run).await;

        run.report.status = status;
        run.report.pages_pending += run.pages.len();
        run.report.partitions_ended = run
            .frontier
            .ended_partitions()
            .into_iter()
            .map(str::to_string)
            .collect();
        run.report.breaker_trips = run.breaker.trips();
        run.report.elapsed = started.elapsed();
        run.report.log();

        match outcome {
            Err(e) => {
                error!("Crawl aborted: {}", e);
                Err(e)
            }
            Ok(_) => {
                saved?;
                Ok(run.report)
            }
        }
    }

    /// Folds whatever in-flight work finishes within the grace period
    async fn drain(&mut self, run: &mut Run) {
        let grace = self.crawler.shutdown_grace();
        let drained = timeout(grace, async {
            while let Some(joined) = run.tasks.join_next().await {
                if let Err(e) = self.handle(run, joined) {
                    warn!("Error while draining: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(abandoned = run.tasks.len(), "Grace period over; abandoning in-flight work");
        }
    }

    fn dispatch(&mut self, run: &mut Run, now: Instant) {
        // Items first so pages already holding a permit finish before new ones start
        let items_ready = run.item_backoff_until.map_or(true, |until| now >= until);
        while items_ready && !run.queue.is_empty() {
            let Ok(permit) = run.item_permits.clone().try_acquire_owned() else {
                break;
            };
            let Some((coordinate, item)) = run.queue.pop_front() else {
                break;
            };
            self.spawn_item(run, coordinate, item, permit);
        }
        if items_ready {
            run.item_backoff_until = None;
        }

        loop {
            let Ok(permit) = run.page_permits.clone().try_acquire_owned() else {
                break;
            };
            let merger = &self.merger;
            let pages = &run.pages;
            let Some(Dispatch {
                coordinate,
                attempts,
            }) = run
                .frontier
                .next(now, |c| merger.is_complete(c) || pages.contains_key(c))
            else {
                break;
            };

            run.pages.insert(
                coordinate.clone(),
                PageWork {
                    state: CoordinateState::Scanning,
                    total: 0,
                    outstanding: 0,
                    failures: 0,
                    _permit: permit,
                },
            );
            self.spawn_scan(run, coordinate, attempts);
        }
    }

    fn spawn_scan(&self, run: &mut Run, coordinate: WorkCoordinate, attempts: u32) {
        debug!("{}: {} -> {}", coordinate, CoordinateState::Pending, CoordinateState::Scanning);
        let pool = self.pool.clone();
        let scanner = self.scanner.clone();

        run.tasks.spawn(async move {
            let result = match pool.acquire(SessionProfile::ListScan).await {
                Ok(mut lease) => scanner.scan(&coordinate, &mut *lease).await,
                Err(e) => Err(e),
            };
            TaskResult::Scan {
                coordinate,
                attempts,
                result,
            }
        });
    }

    fn spawn_item(
        &self,
        run: &mut Run,
        coordinate: WorkCoordinate,
        item: CandidateItem,
        permit: OwnedSemaphorePermit,
    ) {
        let pool = self.pool.clone();
        let fetcher = self.fetcher.clone();

        run.tasks.spawn(async move {
            let _permit = permit;
            let report = match pool.acquire(SessionProfile::Metadata).await {
                Ok(mut lease) => Ok(fetcher.fetch(&item, &coordinate, &mut *lease).await),
                Err(e) => Err(e),
            };
            TaskResult::Item {
                coordinate,
                item,
                report,
            }
        });
    }

    fn handle(&mut self, run: &mut Run, joined: Result<TaskResult, JoinError>) -> Result<(), GleanError> {
        match joined {
            Ok(TaskResult::Scan {
                coordinate,
                attempts,
                result,
            }) => self.handle_scan(run, coordinate, attempts + 1, result),
            Ok(TaskResult::Item {
                coordinate,
                item,
                report,
            }) => self.handle_item(run, coordinate, item, report),
            Err(e) if e.is_panic() => Err(GleanError::Fatal(format!("crawl task panicked: {}", e))),
            Err(_) => Ok(()),
        }
    }

    fn handle_scan(
        &mut self,
        run: &mut Run,
        coordinate: WorkCoordinate,
        attempts: u32,
        result: Result<ScanResult, GleanError>,
    ) -> Result<(), GleanError> {
        let now = Instant::now();

        match result {
            Ok(scan) if scan.is_partition_end => {
                self.page(run, &coordinate)?
                    .advance(&coordinate, CoordinateState::Complete)?;
                run.pages.remove(&coordinate);
                run.frontier.mark_end(&coordinate);
                self.merger.mark_complete(coordinate.clone());
                run.report.pages_completed += 1;
                info!("{}: end of partition {}", coordinate, coordinate.partition);
                self.request_checkpoint(run, "partition end");
            }
            Ok(scan) if scan.is_transient_failure() => {
                if let (Some(writer), Some(html)) = (&self.diagnostics, &scan.page_html) {
                    writer.capture(&coordinate, html, "no items and no end-of-partition text");
                }
                self.retry_scan(run, coordinate, attempts, "no items found", now)?;
            }
            Ok(scan) => {
                self.page(run, &coordinate)?
                    .advance(&coordinate, CoordinateState::Enriching)?;

                let total = scan.items.len();
                let mut queued = 0;
                for item in scan.items {
                    if !self.merger.needs_fetch(&item.identity) || run.in_flight.contains(&item.identity) {
                        run.report.items_known += 1;
                        continue;
                    }
                    run.in_flight.insert(item.identity.clone());
                    run.queue.push_back((coordinate.clone(), item));
                    queued += 1;
                }

                debug!(
                    total,
                    queued,
                    strategy = scan.strategy.unwrap_or("-"),
                    "{}: enriching",
                    coordinate
                );

                let page = self.page(run, &coordinate)?;
                page.total = total;
                page.outstanding = queued;
                if queued == 0 {
                    self.finalize_page(run, &coordinate)?;
                }
            }
            Err(GleanError::Navigation(e)) if e.is_network_down() => {
                let until = run.breaker.network_down(now);
                self.request_checkpoint(run, "network down");

                let outages = run.scan_outages.entry(coordinate.clone()).or_insert(0);
                *outages += 1;
                if *outages > self.crawler.network_down_retries {
                    warn!("{}: still unreachable after {} outages", coordinate, outages);
                    self.retry_scan(run, coordinate, attempts, &e.to_string(), now)?;
                } else {
                    self.page(run, &coordinate)?
                        .advance(&coordinate, CoordinateState::Pending)?;
                    run.pages.remove(&coordinate);
                    // Outages within the allowance do not use up scan attempts
                    run.frontier.retry(coordinate, attempts - 1, until);
                }
            }
            Err(e) => {
                warn!("{}: scan failed: {}", coordinate, e);
                self.retry_scan(run, coordinate, attempts, &e.to_string(), now)?;
            }
        }
        Ok(())
    }

    fn retry_scan(
        &mut self,
        run: &mut Run,
        coordinate: WorkCoordinate,
        attempts: u32,
        reason: &str,
        now: Instant,
    ) -> Result<(), GleanError> {
        self.page(run, &coordinate)?
            .advance(&coordinate, CoordinateState::Pending)?;
        run.pages.remove(&coordinate);

        if attempts < self.crawler.scan_attempts {
            warn!(
                attempt = attempts,
                "{}: {}; retrying in {:?}",
                coordinate,
                reason,
                self.crawler.scan_retry_delay()
            );
            run.frontier
                .retry(coordinate, attempts, now + self.crawler.scan_retry_delay());
            run.report.scan_retries += 1;
        } else {
            warn!("{}: {} after {} attempts; leaving pending", coordinate, reason, attempts);
            run.report.pages_pending += 1;
        }
        Ok(())
    }

    fn handle_item(
        &mut self,
        run: &mut Run,
        coordinate: WorkCoordinate,
        item: CandidateItem,
        report: Result<FetchReport, GleanError>,
    ) -> Result<(), GleanError> {
        let now = Instant::now();

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!("Could not lease a session for {}: {}", item.display_name, e);
                run.queue.push_front((coordinate, item));
                run.item_backoff_until = Some(now + self.crawler.scan_retry_delay());
                return Ok(());
            }
        };
        run.report.retries += u64::from(report.retries());

        let failed = match report.outcome {
            FetchOutcome::NetworkDown(e) => {
                run.breaker.network_down(now);
                self.request_checkpoint(run, "network down");

                let outages = run.item_outages.entry(item.identity.clone()).or_insert(0);
                *outages += 1;
                if *outages <= self.crawler.network_down_retries {
                    run.queue.push_front((coordinate, item));
                    return Ok(());
                }
                warn!(
                    "{}: giving up on {} after {} outages",
                    coordinate, item.display_name, outages
                );
                let record = self.fetcher.give_up(&item, &coordinate, None);
                self.fold_unresolved(run, &coordinate, &item, record, &e.to_string(), now);
                true
            }
            FetchOutcome::Resolved(record) => {
                self.merger.record_attempt(true);
                run.breaker.record(true, now);
                self.merger.fold(record);
                run.report.items_resolved += 1;
                run.folds_since_checkpoint += 1;
                false
            }
            FetchOutcome::Unresolved { record, reason } => {
                self.fold_unresolved(run, &coordinate, &item, record, &reason, now);
                true
            }
        };

        run.in_flight.remove(&item.identity);
        run.item_outages.remove(&item.identity);

        let page = self.page(run, &coordinate)?;
        page.outstanding = page.outstanding.saturating_sub(1);
        if failed {
            page.failures += 1;
        }
        if page.outstanding == 0 {
            self.finalize_page(run, &coordinate)?;
        } else if run.folds_since_checkpoint >= self.crawler.checkpoint_every.max(1) {
            self.request_checkpoint(run, "periodic");
        }
        Ok(())
    }

    /// Counts a failed item, keeping its sentinel record if there is one
    fn fold_unresolved(
        &mut self,
        run: &mut Run,
        coordinate: &WorkCoordinate,
        item: &CandidateItem,
        record: Option<Record>,
        reason: &str,
        now: Instant,
    ) {
        self.merger.record_attempt(false);
        match record {
            Some(record) => {
                self.merger.fold(record);
                run.report.items_sentinel += 1;
                run.folds_since_checkpoint += 1;
            }
            None => {
                run.report.items_dropped += 1;
            }
        }
        debug!("{}: {} unresolved ({})", coordinate, item.display_name, reason);

        if run.breaker.record(false, now).is_some() {
            self.request_checkpoint(run, "circuit breaker");
        }
    }

    /// Applies the quality gate to a page whose items have all returned
    fn finalize_page(&mut self, run: &mut Run, coordinate: &WorkCoordinate) -> Result<(), GleanError> {
        let Some(mut page) = run.pages.remove(coordinate) else {
            return Ok(());
        };

        if quality_gate_passes(page.failures, page.total, self.quality.max_failure_ratio) {
            page.advance(coordinate, CoordinateState::Complete)?;
            self.merger.mark_complete(coordinate.clone());
            run.report.pages_completed += 1;
            info!(
                "{}: complete ({}/{} items resolved)",
                coordinate,
                page.total - page.failures,
                page.total
            );
            drop(page);
            self.request_checkpoint(run, "page complete");
        } else {
            page.advance(coordinate, CoordinateState::Pending)?;
            run.report.pages_pending += 1;
            warn!(
                "{}: {} of {} items failed; page stays pending",
                coordinate, page.failures, page.total
            );
        }
        Ok(())
    }

    fn page<'a>(&self, run: &'a mut Run, coordinate: &WorkCoordinate) -> Result<&'a mut PageWork, GleanError> {
        run.pages
            .get_mut(coordinate)
            .ok_or_else(|| GleanError::Fatal(format!("no dispatched page for {}", coordinate)))
    }

    /// Starts a checkpoint, or queues one behind the save already in flight
    fn request_checkpoint(&mut self, run: &mut Run, reason: &'static str) {
        run.folds_since_checkpoint = 0;
        if run.saving.is_some() {
            run.save_requested = Some(reason);
            return;
        }

        self.merger.touch_checkpoint();
        let store = self.store.clone();
        let state = self.merger.state().clone();
        run.saving = Some(PendingSave {
            reason,
            handle: tokio::task::spawn_blocking(move || store.save(&state)),
        });
    }

    fn finish_checkpoint(
        &mut self,
        run: &mut Run,
        reason: &'static str,
        saved: Result<StorageResult<SaveOutcome>, JoinError>,
    ) {
        if let Err(e) = self.record_checkpoint(run, reason, saved) {
            error!("Checkpoint ({}) failed: {}", reason, e);
        }
    }

    /// Waits out any save in flight, then writes the current state
    async fn final_checkpoint(&mut self, run: &mut Run) -> Result<(), StorageError> {
        run.save_requested = None;
        if let Some(save) = run.saving.take() {
            let saved = save.handle.await;
            self.finish_checkpoint(run, save.reason, saved);
        }

        self.request_checkpoint(run, "final");
        match run.saving.take() {
            Some(save) => {
                let saved = save.handle.await;
                self.record_checkpoint(run, save.reason, saved)
            }
            None => Ok(()),
        }
    }

    fn record_checkpoint(
        &mut self,
        run: &mut Run,
        reason: &'static str,
        saved: Result<StorageResult<SaveOutcome>, JoinError>,
    ) -> Result<(), StorageError> {
        match saved?? {
            SaveOutcome::Written => {
                run.report.checkpoints += 1;
                debug!(
                    reason,
                    records = self.merger.len(),
                    completed = self.merger.state().completed.len(),
                    "Checkpoint written"
                );
                if let Some((hook, path)) = &self.hook {
                    hook.after_checkpoint(path);
                }
            }
            SaveOutcome::Skipped => debug!(reason, "Checkpoint skipped; save in progress"),
        }
        Ok(())
    }
}
