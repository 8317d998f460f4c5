//! Crawler module: list scanning, detail enrichment, and scheduling
//!
//! This module contains the core crawling logic, including:
//! - Site rules and pluggable candidate extraction strategies
//! - List page scanning and detail page enrichment with retries
//! - The coordinate frontier, circuit breaker, and crawl scheduler
//! - Overall crawl coordination and signal handling

mod breaker;
mod coordinator;
mod detail;
mod frontier;
mod report;
mod scanner;
mod scheduler;
mod site;
mod strategies;

pub use breaker::{CircuitBreaker, TripReason};
pub use coordinator::{run_crawl, Coordinator, CrawlOptions};
pub use detail::{DetailFetcher, FetchOutcome, FetchReport};
pub use frontier::{Dispatch, Frontier, QueuedCoordinate};
pub use report::{RunReport, RunStatus};
pub use scanner::{ListPageScanner, ScanResult};
pub use scheduler::{quality_gate_passes, CrawlScheduler};
pub use site::{parse_selector, Enrichment, SiteRules};
pub use strategies::{default_strategies, ExtractionStrategy, ImageAncestorStrategy, LinkedImageStrategy};
