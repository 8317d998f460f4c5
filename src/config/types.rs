use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Gleaner
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub fetch: FetchConfig,
    pub quality: QualityConfig,
    pub breaker: BreakerConfig,
    pub renderer: RendererConfig,
    pub site: SiteConfig,
    pub partitions: Vec<PartitionEntry>,
    pub output: OutputConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Returns the configured partitions, falling back to the built-in tier table
    pub fn effective_partitions(&self) -> Vec<PartitionEntry> {
        if self.partitions.is_empty() {
            default_partitions()
        } else {
            self.partitions.clone()
        }
    }

    /// Partition names in crawl order (also the persisted sort order)
    pub fn partition_order(&self) -> Vec<String> {
        self.effective_partitions()
            .into_iter()
            .map(|p| p.name)
            .collect()
    }
}

/// Scheduler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of pages being scanned or enriched at once
    pub page_concurrency: usize,

    /// Maximum number of detail fetches in flight across all pages
    pub item_concurrency: usize,

    /// Pacing delay before every detail navigation (milliseconds)
    pub request_delay_ms: u64,

    /// Scan attempts per coordinate within a single run
    pub scan_attempts: u32,

    /// Delay before a transiently failed scan is retried (milliseconds)
    pub scan_retry_delay_ms: u64,

    /// Network-down reports one item or coordinate may requeue before it is
    /// treated as an ordinary failure
    pub network_down_retries: u32,

    /// Folded records between periodic checkpoints
    pub checkpoint_every: usize,

    /// How long in-flight work may finish after an interrupt (milliseconds)
    pub shutdown_grace_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_concurrency: 2,
            item_concurrency: 8,
            request_delay_ms: 500,
            scan_attempts: 3,
            scan_retry_delay_ms: 5_000,
            network_down_retries: 3,
            checkpoint_every: 25,
            shutdown_grace_ms: 3_000,
        }
    }
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn scan_retry_delay(&self) -> Duration {
        Duration::from_millis(self.scan_retry_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// How the delay between detail attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffKind {
    /// `backoff-ms * attempt`
    Linear,
    /// `backoff-ms` between every attempt
    Fixed,
}

/// What happens to an item whose classification never resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustedPolicy {
    /// Drop the item; its page stays eligible for a later re-scan
    Drop,
    /// Persist the item with sentinel category and attribution
    Lenient,
}

/// Detail fetch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Attempts per item before the exhausted policy applies
    pub max_attempts: u32,

    /// Base delay between attempts (milliseconds)
    pub backoff_ms: u64,

    pub backoff: BackoffKind,

    pub on_exhausted: ExhaustedPolicy,

    /// Bounded wait for the classification and attribution elements (milliseconds)
    pub wait_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2_500,
            backoff: BackoffKind::Linear,
            on_exhausted: ExhaustedPolicy::Drop,
            wait_timeout_ms: 20_000,
        }
    }
}

impl FetchConfig {
    /// Delay to sleep after the given (1-based) failed attempt
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.backoff_ms);
        match self.backoff {
            BackoffKind::Linear => base * attempt.max(1),
            BackoffKind::Fixed => base,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn is_lenient(&self) -> bool {
        self.on_exhausted == ExhaustedPolicy::Lenient
    }
}

/// Page completion policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QualityConfig {
    /// A page completes only when its failure ratio is strictly below this value
    pub max_failure_ratio: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_failure_ratio: 0.5,
        }
    }
}

/// Degraded-connectivity detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BreakerConfig {
    /// The breaker may trip once consecutive failures exceed this count
    pub failure_threshold: u32,

    /// Rolling success rate below which the breaker trips
    pub success_floor: f64,

    /// Number of recent outcomes in the rolling rate
    pub window: usize,

    pub cooldown_secs: u64,

    /// Cooldown after an explicit network-down escalation
    pub network_down_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            success_floor: 0.3,
            window: 20,
            cooldown_secs: 90,
            network_down_cooldown_secs: 120,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn network_down_cooldown(&self) -> Duration {
        Duration::from_secs(self.network_down_cooldown_secs)
    }
}

/// Renderer pool and session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RendererConfig {
    /// Navigation timeout for list pages (seconds)
    pub list_timeout_secs: u64,

    /// Navigation timeout for detail pages (seconds)
    pub detail_timeout_secs: u64,

    /// Settle delay after a list page loads (milliseconds)
    pub list_settle_ms: u64,

    /// Interval between wait-for-condition polls (milliseconds)
    pub poll_interval_ms: u64,

    /// Leases before the underlying engine is recycled
    pub recycle_after: u64,

    /// Hard cap on concurrently leased sessions
    pub max_sessions: Option<usize>,

    /// Fail with PoolExhausted instead of waiting when the cap is reached
    pub fail_fast: bool,

    /// Identities presented by sessions, rotated per session
    pub user_agents: Vec<String>,

    /// Case-insensitive page text that marks a blocked response
    pub blocked_markers: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            list_timeout_secs: 60,
            detail_timeout_secs: 30,
            list_settle_ms: 0,
            poll_interval_ms: 500,
            recycle_after: 20,
            max_sessions: None,
            fail_fast: false,
            user_agents: default_user_agents(),
            blocked_markers: vec!["captcha".to_string(), "unusual traffic".to_string()],
        }
    }
}

impl RendererConfig {
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }

    pub fn list_settle(&self) -> Duration {
        Duration::from_millis(self.list_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which candidate URL becomes the record identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentitySource {
    Image,
    Detail,
}

/// Target site layout: URLs, selectors, and text markers
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteConfig {
    /// List page template with `{partition}` and `{page}` placeholders
    pub list_url: String,

    /// Text shown on a list page past the end of a partition
    pub no_results_text: String,

    /// Substrings identifying detail links
    pub detail_link_patterns: Vec<String>,

    /// Host substring accepted by the image-ancestor strategy
    pub detail_host_hint: String,

    /// Image URL substrings that are never items (card backs, placeholders)
    pub excluded_image_markers: Vec<String>,

    /// Display names that are navigation chrome, not items
    pub blacklist: Vec<String>,

    pub identity: IdentitySource,

    pub breadcrumb_item_selector: String,
    pub breadcrumb_position_selector: String,
    pub breadcrumb_name_selector: String,

    /// Breadcrumb depth holding the category
    pub category_position: u32,

    pub attribution_selector: String,

    /// Links whose text contains this are not attributions
    pub attribution_exclude_text: String,

    /// Free-text label preceding the attribution value
    pub attribution_label: String,

    /// Free-text marker ending the attribution value
    pub attribution_terminator: String,

    /// Name recorded for placeholder attributions
    pub anonymous_name: String,

    /// Attribution values (or fragments) that mean "no real creator"
    pub anonymous_markers: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            list_url: "https://shoob.gg/cards?page={page}&tier={partition}".to_string(),
            no_results_text: "No cards found".to_string(),
            detail_link_patterns: vec!["/cards/info/".to_string(), "/card/".to_string()],
            detail_host_hint: "shoob.gg".to_string(),
            excluded_image_markers: vec!["card_back".to_string()],
            blacklist: [
                "shoob home",
                "home",
                "shoob logo",
                "navigation",
                "nav",
                "menu",
                "header",
                "footer",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            identity: IdentitySource::Image,
            breadcrumb_item_selector: r#"ol.breadcrumb-new li[itemprop="itemListElement"]"#
                .to_string(),
            breadcrumb_position_selector: r#"meta[itemprop="position"]"#.to_string(),
            breadcrumb_name_selector: r#"span[itemprop="name"]"#.to_string(),
            category_position: 3,
            attribution_selector: r#"a[href*="/u/"]"#.to_string(),
            attribution_exclude_text: "See".to_string(),
            attribution_label: "Card Maker:".to_string(),
            attribution_terminator: "See the Maker".to_string(),
            anonymous_name: "Anonymous".to_string(),
            anonymous_markers: [
                "Official",
                "Unknown Creator",
                "People who want",
                "Requested by",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One partition and its page bounds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionEntry {
    pub name: String,

    #[serde(default = "default_first_page")]
    pub first_page: u32,

    /// Last page to scan; unbounded partitions run until the no-results page
    #[serde(default)]
    pub last_page: Option<u32>,
}

impl PartitionEntry {
    pub fn new(name: &str, first_page: u32, last_page: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            first_page,
            last_page,
        }
    }

    /// Number of pages in the partition, if bounded
    pub fn page_count(&self) -> Option<u32> {
        self.last_page
            .map(|last| last.saturating_sub(self.first_page) + 1)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Canonical state document
    pub state_path: PathBuf,

    /// Secondary copy written after every successful save
    pub backup_path: Option<PathBuf>,

    pub snapshot_dir: Option<PathBuf>,

    /// Successful saves between timestamped snapshots
    pub snapshot_every: u64,

    /// Snapshots retained on disk
    pub snapshot_keep: usize,

    pub diagnostics_dir: PathBuf,

    pub summary_path: PathBuf,

    /// Start empty when every file in the backup chain is corrupt
    pub allow_empty_fallback: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("cards/cards_data.json"),
            backup_path: None,
            snapshot_dir: None,
            snapshot_every: 50,
            snapshot_keep: 10,
            diagnostics_dir: PathBuf::from("cards/diagnostics"),
            summary_path: PathBuf::from("cards/summary.md"),
            allow_empty_fallback: false,
        }
    }
}

impl OutputConfig {
    /// Backup path, derived as `<stem>.backup.json` when not configured
    pub fn effective_backup_path(&self) -> PathBuf {
        self.backup_path.clone().unwrap_or_else(|| {
            let stem = file_stem(&self.state_path);
            self.state_path.with_file_name(format!("{}.backup.json", stem))
        })
    }

    /// Snapshot directory, derived as `<state dir>/snapshots` when not configured
    pub fn effective_snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir.clone().unwrap_or_else(|| {
            self.state_path
                .parent()
                .map(|p| p.join("snapshots"))
                .unwrap_or_else(|| PathBuf::from("snapshots"))
        })
    }
}

/// Post-checkpoint sync hook
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Program and arguments spawned after a checkpoint; empty disables sync
    pub command: Vec<String>,

    /// Credential handed to the command as GLEANER_SYNC_TOKEN
    #[serde(skip)]
    pub token: Option<String>,

    pub min_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            token: None,
            min_interval_secs: 300,
        }
    }
}

pub(crate) fn file_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string())
}

fn default_first_page() -> u32 {
    1
}

fn default_partitions() -> Vec<PartitionEntry> {
    [
        ("1", 805),
        ("2", 549),
        ("3", 440),
        ("4", 360),
        ("5", 138),
        ("6", 35),
        ("S", 8),
    ]
    .iter()
    .map(|(name, last)| PartitionEntry::new(name, 1, Some(*last)))
    .collect()
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
