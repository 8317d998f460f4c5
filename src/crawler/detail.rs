//! Detail page enrichment with bounded retries

use crate::config::{FetchConfig, RendererConfig};
use crate::crawler::site::{Enrichment, SiteRules};
use crate::renderer::{NavigationError, Session, WaitPolicy};
use crate::state::{CandidateItem, Record, WorkCoordinate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How an item's enrichment ended
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Both category and attribution resolved
    Resolved(Record),

    /// Attempts ran out; `record` carries the sentinel record in lenient mode
    Unresolved {
        record: Option<Record>,
        reason: String,
    },

    /// Connectivity is gone; the scheduler must back off before retrying
    NetworkDown(NavigationError),
}

impl FetchOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcome: FetchOutcome,
    pub attempts: u32,
}

impl FetchReport {
    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub struct DetailFetcher {
    rules: Arc<SiteRules>,
    config: FetchConfig,
    request_delay: Duration,
    wait: WaitPolicy,
}

impl DetailFetcher {
    pub fn new(
        rules: Arc<SiteRules>,
        config: FetchConfig,
        renderer: &RendererConfig,
        request_delay: Duration,
    ) -> Self {
        // Category and attribution render independently, so wait for both
        let wait = WaitPolicy::load(renderer.detail_timeout() + config.wait_timeout())
            .with_poll_interval(renderer.poll_interval())
            .require(rules.breadcrumb_item.clone())
            .require(rules.attribution.clone());

        Self {
            rules,
            config,
            request_delay,
            wait,
        }
    }

    /// Enriches one candidate item
    ///
    /// Retries up to `max-attempts` with backoff between attempts. A wait that
    /// times out still extracts whatever rendered. `NetworkDown` is returned
    /// immediately instead of being retried.
    pub async fn fetch<S: Session>(
        &self,
        item: &CandidateItem,
        coordinate: &WorkCoordinate,
        session: &mut S,
    ) -> FetchReport {
        let max_attempts = self.config.max_attempts.max(1);
        let mut reason = String::new();
        let mut partial = Enrichment::default();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                sleep(self.config.backoff_after(attempt - 1)).await;
            }
            if !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }

            match session.navigate(&item.detail_ref, &self.wait).await {
                Ok(()) | Err(NavigationError::ConditionTimeout { .. }) => {}
                Err(e) if e.is_network_down() => {
                    warn!("Network down while fetching {}: {}", item.detail_ref, e);
                    return FetchReport {
                        outcome: FetchOutcome::NetworkDown(e),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    debug!(
                        attempt,
                        max_attempts, "Navigation failed for {}: {}", item.display_name, e
                    );
                    reason = e.to_string();
                    continue;
                }
            }

            let enrichment = session
                .extract(|document| self.rules.enrich(document))
                .unwrap_or_default();

            if let (Some(category), Some(attribution)) =
                (&enrichment.category, &enrichment.attribution)
            {
                debug!(attempt, "Resolved {} [{}]", item.display_name, category);
                return FetchReport {
                    outcome: FetchOutcome::Resolved(Record::enriched(
                        item,
                        coordinate,
                        category.clone(),
                        attribution.clone(),
                    )),
                    attempts: attempt,
                };
            }

            reason = match (&enrichment.category, &enrichment.attribution) {
                (None, None) => "category and attribution unresolved",
                (None, Some(_)) => "category unresolved",
                _ => "attribution unresolved",
            }
            .to_string();
            debug!(
                attempt,
                max_attempts, "{} for {}", reason, item.display_name
            );

            if enrichment.attribution.is_some() {
                partial.attribution = enrichment.attribution;
            }
        }

        warn!(
            "Giving up on {} after {} attempts: {}",
            item.display_name, max_attempts, reason
        );

        FetchReport {
            outcome: FetchOutcome::Unresolved {
                record: self.give_up(item, coordinate, partial.attribution),
                reason,
            },
            attempts: max_attempts,
        }
    }

    /// What to keep for an item that will not be fetched again this run
    ///
    /// Lenient mode keeps a sentinel record with `attribution`, or the anonymous
    /// name when none was seen. Drop mode keeps nothing.
    pub fn give_up(
        &self,
        item: &CandidateItem,
        coordinate: &WorkCoordinate,
        attribution: Option<String>,
    ) -> Option<Record> {
        self.config.is_lenient().then(|| {
            let attribution = attribution.unwrap_or_else(|| self.rules.anonymous_name.clone());
            Record::sentinel(item, coordinate, &attribution)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffKind, ExhaustedPolicy, SiteConfig};
    use crate::renderer::{MemoryRenderer, Renderer, Scripted, SessionProfile};

    const DETAIL: &str = "https://shoob.gg/cards/info/1";

    fn resolved_page() -> String {
        r#"<ol class="breadcrumb-new">
             <li itemprop="itemListElement"><span itemprop="name">Home</span><meta itemprop="position" content="1"></li>
             <li itemprop="itemListElement"><span itemprop="name">Tier 1</span><meta itemprop="position" content="2"></li>
             <li itemprop="itemListElement"><span itemprop="name">Naruto</span><meta itemprop="position" content="3"></li>
             <li itemprop="itemListElement"><span itemprop="name">Sakura</span><meta itemprop="position" content="4"></li>
           </ol>
           <p>Card Maker: <a href="/u/kira">Kira</a> <a href="/u/kira">See the Maker</a></p>"#
            .to_string()
    }

    fn fetcher(policy: ExhaustedPolicy) -> DetailFetcher {
        let rules = Arc::new(SiteRules::from_config(&SiteConfig::default()).unwrap());
        let config = FetchConfig {
            max_attempts: 3,
            backoff_ms: 1_000,
            backoff: BackoffKind::Linear,
            on_exhausted: policy,
            wait_timeout_ms: 1_000,
        };
        DetailFetcher::new(rules, config, &RendererConfig::default(), Duration::ZERO)
    }

    fn item() -> CandidateItem {
        CandidateItem::new("https://cdn/1.png", DETAIL, "Sakura")
    }

    fn coordinate() -> WorkCoordinate {
        WorkCoordinate::new("1", 4)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_on_first_attempt() {
        let renderer = MemoryRenderer::new();
        renderer.page(DETAIL, resolved_page());
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();

        let report = fetcher(ExhaustedPolicy::Drop)
            .fetch(&item(), &coordinate(), &mut session)
            .await;

        assert_eq!(report.attempts, 1);
        match report.outcome {
            FetchOutcome::Resolved(record) => {
                assert_eq!(record.category, "Naruto");
                assert_eq!(record.attribution_name, "Kira");
                assert_eq!(record.composite_description, "Sakura from Naruto");
                assert_eq!(record.partition, "1");
                assert_eq!(record.page_index, 4);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_resolves() {
        let renderer = MemoryRenderer::new();
        renderer.script(
            DETAIL,
            vec![
                Scripted::Fail(NavigationError::Timeout {
                    url: DETAIL.to_string(),
                    timeout: Duration::from_secs(30),
                }),
                Scripted::Page("<p>still loading</p>".to_string()),
                Scripted::Page(resolved_page()),
            ],
        );
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();

        let started = tokio::time::Instant::now();
        let report = fetcher(ExhaustedPolicy::Drop)
            .fetch(&item(), &coordinate(), &mut session)
            .await;

        assert!(report.outcome.is_resolved());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.retries(), 2);
        // Linear backoff: 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(renderer.navigation_count(DETAIL), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_drop() {
        let renderer = MemoryRenderer::new();
        renderer.page(DETAIL, "<p>Card Maker: Kira See the Maker</p>");
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();

        let report = fetcher(ExhaustedPolicy::Drop)
            .fetch(&item(), &coordinate(), &mut session)
            .await;

        assert_eq!(report.attempts, 3);
        match report.outcome {
            FetchOutcome::Unresolved { record, reason } => {
                assert!(record.is_none());
                assert_eq!(reason, "category unresolved");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_lenient_keeps_sentinel() {
        let renderer = MemoryRenderer::new();
        renderer.page(DETAIL, "<p>Card Maker: Kira See the Maker</p>");
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();

        let report = fetcher(ExhaustedPolicy::Lenient)
            .fetch(&item(), &coordinate(), &mut session)
            .await;

        match report.outcome {
            FetchOutcome::Unresolved {
                record: Some(record),
                ..
            } => {
                assert!(record.is_unresolved());
                assert_eq!(record.attribution_name, "Kira");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_give_up_follows_policy() {
        assert!(fetcher(ExhaustedPolicy::Drop)
            .give_up(&item(), &coordinate(), None)
            .is_none());

        let record = fetcher(ExhaustedPolicy::Lenient)
            .give_up(&item(), &coordinate(), None)
            .unwrap();
        assert!(record.is_unresolved());
        assert_eq!(record.attribution_name, SiteConfig::default().anonymous_name);
        assert_eq!(record.page_index, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_down_escalates_immediately() {
        let renderer = MemoryRenderer::new();
        renderer.fail(
            DETAIL,
            NavigationError::NetworkDown {
                url: DETAIL.to_string(),
                message: "dns error".to_string(),
            },
        );
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();

        let report = fetcher(ExhaustedPolicy::Drop)
            .fetch(&item(), &coordinate(), &mut session)
            .await;

        assert!(matches!(report.outcome, FetchOutcome::NetworkDown(_)));
        assert_eq!(report.attempts, 1);
        assert_eq!(renderer.navigation_count(DETAIL), 1);
    }
}
