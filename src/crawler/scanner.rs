//! List page scanning with best-of-N strategy selection

use crate::config::RendererConfig;
use crate::crawler::site::SiteRules;
use crate::crawler::strategies::{default_strategies, ExtractionStrategy};
use crate::renderer::{Document, Session, WaitPolicy};
use crate::state::{CandidateItem, WorkCoordinate};
use crate::url::render_list_url;
use crate::GleanError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// What a list page produced
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Deduplicated candidates from the best strategy, in page order
    pub items: Vec<CandidateItem>,

    /// The page showed the no-results sentinel and had no items
    pub is_partition_end: bool,

    /// Strategy whose result was kept
    pub strategy: Option<&'static str>,

    /// Raw yield of every strategy, in declaration order
    pub yields: Vec<(&'static str, usize)>,

    /// Page markup kept for diagnostics when the scan found nothing
    pub page_html: Option<String>,
}

impl ScanResult {
    /// No items and no end sentinel: the page probably failed to render
    pub fn is_transient_failure(&self) -> bool {
        self.items.is_empty() && !self.is_partition_end
    }

    /// More than one strategy produced items but they disagreed on the count
    pub fn is_ambiguous(&self) -> bool {
        let nonzero: Vec<usize> = self.yields.iter().map(|(_, n)| *n).filter(|n| *n > 0).collect();
        nonzero.len() > 1 && nonzero.iter().any(|n| *n != nonzero[0])
    }
}

pub struct ListPageScanner {
    rules: Arc<SiteRules>,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    wait: WaitPolicy,
}

impl ListPageScanner {
    pub fn new(rules: Arc<SiteRules>, renderer: &RendererConfig) -> Self {
        Self {
            rules,
            strategies: default_strategies(),
            wait: WaitPolicy::load(renderer.list_timeout())
                .with_settle(renderer.list_settle())
                .with_poll_interval(renderer.poll_interval()),
        }
    }

    /// Replaces the strategy list (declaration order is the tie-break order)
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn rules(&self) -> &SiteRules {
        &self.rules
    }

    /// Loads the coordinate's list page and extracts its candidates
    ///
    /// Navigation failures are returned as errors. An empty page without the
    /// end sentinel comes back as a transient failure, not an error.
    pub async fn scan<S: Session>(
        &self,
        coordinate: &WorkCoordinate,
        session: &mut S,
    ) -> Result<ScanResult, GleanError> {
        let url = render_list_url(&self.rules.list_url, coordinate)?;
        debug!("Scanning {} ({})", coordinate, url);

        session.navigate(url.as_str(), &self.wait).await?;

        let mut result = session
            .extract(|document| self.evaluate(document))
            .unwrap_or_default();

        if result.is_transient_failure() {
            result.page_html = session.source().map(|s| s.html.clone());
        }

        if result.is_ambiguous() {
            debug!(yields = ?result.yields, "Strategies disagreed on {}", coordinate);
        }

        info!(
            "Scanned {}: {} items{}",
            coordinate,
            result.items.len(),
            if result.is_partition_end {
                " (end of partition)"
            } else {
                ""
            }
        );
        Ok(result)
    }

    /// Runs every strategy against a loaded page and keeps the largest result
    ///
    /// Ties go to the strategy declared first and are decided on raw yields.
    /// The kept candidates are then deduplicated by identity, keeping the first
    /// occurrence, and stripped of blacklisted names and excluded images.
    pub fn evaluate(&self, document: &Document) -> ScanResult {
        let mut best: Option<(&'static str, Vec<CandidateItem>)> = None;
        let mut yields = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let found = strategy.extract(document, &self.rules);
            yields.push((strategy.name(), found.len()));

            let better = match &best {
                None => true,
                Some((_, current)) => found.len() > current.len(),
            };
            if better {
                best = Some((strategy.name(), found));
            }
        }

        let (strategy, raw) = match best {
            Some((name, items)) if !items.is_empty() => (Some(name), items),
            _ => (None, Vec::new()),
        };

        let mut seen = HashSet::new();
        let unique: Vec<CandidateItem> = raw
            .into_iter()
            .filter(|item| seen.insert(item.identity.clone()))
            .collect();

        let found = unique.len();
        let items: Vec<CandidateItem> = unique
            .into_iter()
            .filter(|item| {
                !self.rules.is_excluded_image(&item.image_ref)
                    && !self.rules.is_blacklisted(&item.display_name)
            })
            .collect();
        if items.len() < found {
            debug!(filtered = found - items.len(), "Dropped non-item artifacts");
        }

        let is_partition_end = items.is_empty() && self.rules.is_no_results(document);

        ScanResult {
            items,
            is_partition_end,
            strategy,
            yields,
            page_html: None,
        }
    }
}
