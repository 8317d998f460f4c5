//! Scripted in-process renderer
//!
//! Serves canned page sources and failures by URL, records every navigation,
//! and tracks how many navigations were in flight at once. Used to drive the
//! scheduler deterministically and to replay captured pages offline.

use crate::renderer::{NavigationError, PageSource, Renderer, Session, SessionProfile, WaitPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Scripted {
    Page(String),
    Fail(NavigationError),
}

/// A navigation observed by the renderer
#[derive(Debug, Clone)]
pub struct NavigationRecord {
    pub url: String,
    pub profile: SessionProfile,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    responses: Vec<Scripted>,
    served: usize,
}

impl Script {
    /// Serves responses in order; the last one repeats
    fn next(&mut self) -> Option<Scripted> {
        let response = self
            .responses
            .get(self.served.min(self.responses.len().saturating_sub(1)))
            .cloned();
        self.served += 1;
        response
    }
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<String, Script>>,
    navigations: Mutex<Vec<NavigationRecord>>,
    identities: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    active: Mutex<HashMap<SessionProfile, usize>>,
    peak: Mutex<HashMap<SessionProfile, usize>>,
    active_total: AtomicUsize,
    peak_total: AtomicUsize,
    recycles: AtomicU64,
    shut_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct MemoryRenderer {
    inner: Arc<Inner>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` for every navigation to `url`
    pub fn page(&self, url: &str, html: impl Into<String>) -> &Self {
        self.script(url, vec![Scripted::Page(html.into())])
    }

    /// Fails every navigation to `url`
    pub fn fail(&self, url: &str, error: NavigationError) -> &Self {
        self.script(url, vec![Scripted::Fail(error)])
    }

    /// Serves `responses` in order for `url`, repeating the last one
    pub fn script(&self, url: &str, responses: Vec<Scripted>) -> &Self {
        lock(&self.inner.scripts).insert(
            url.to_string(),
            Script {
                responses,
                served: 0,
            },
        );
        self
    }

    /// Delay applied to every navigation
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *lock(&self.inner.latency) = latency;
        self
    }

    pub fn navigations(&self) -> Vec<NavigationRecord> {
        lock(&self.inner.navigations).clone()
    }

    pub fn navigation_count(&self, url: &str) -> usize {
        lock(&self.inner.navigations)
            .iter()
            .filter(|n| n.url == url)
            .count()
    }

    /// Highest number of simultaneous navigations for a profile
    pub fn peak_concurrency(&self, profile: SessionProfile) -> usize {
        lock(&self.inner.peak).get(&profile).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous navigations overall
    pub fn peak_total(&self) -> usize {
        self.inner.peak_total.load(Ordering::Acquire)
    }

    /// Identities presented by opened sessions, in order
    pub fn identities(&self) -> Vec<String> {
        lock(&self.inner.identities).clone()
    }

    pub fn recycles(&self) -> u64 {
        self.inner.recycles.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn enter(&self, profile: SessionProfile) {
        let total = self.inner.active_total.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak_total.fetch_max(total, Ordering::AcqRel);

        let mut active = lock(&self.inner.active);
        let count = active.entry(profile).or_insert(0);
        *count += 1;
        let current = *count;
        drop(active);

        let mut peak = lock(&self.inner.peak);
        let best = peak.entry(profile).or_insert(0);
        *best = (*best).max(current);
    }

    fn leave(&self, profile: SessionProfile) {
        self.inner.active_total.fetch_sub(1, Ordering::AcqRel);
        if let Some(count) = lock(&self.inner.active).get_mut(&profile) {
            *count = count.saturating_sub(1);
        }
    }

    fn respond(&self, url: &str) -> Scripted {
        lock(&self.inner.scripts)
            .get_mut(url)
            .and_then(Script::next)
            .unwrap_or_else(|| {
                Scripted::Fail(NavigationError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

#[async_trait]
impl Renderer for MemoryRenderer {
    type Session = MemorySession;

    async fn open(
        &self,
        profile: SessionProfile,
        identity: &str,
    ) -> Result<MemorySession, NavigationError> {
        lock(&self.inner.identities).push(identity.to_string());
        Ok(MemorySession {
            renderer: self.clone(),
            profile,
            source: None,
        })
    }

    async fn recycle(&self) -> Result<(), NavigationError> {
        self.inner.recycles.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
    }
}

pub struct MemorySession {
    renderer: MemoryRenderer,
    profile: SessionProfile,
    source: Option<PageSource>,
}

impl MemorySession {
    pub fn profile(&self) -> SessionProfile {
        self.profile
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn navigate(&mut self, url: &str, wait: &WaitPolicy) -> Result<(), NavigationError> {
        lock(&self.renderer.inner.navigations).push(NavigationRecord {
            url: url.to_string(),
            profile: self.profile,
            at: Instant::now(),
        });

        self.renderer.enter(self.profile);
        let latency = *lock(&self.renderer.inner.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let response = self.renderer.respond(url);
        self.renderer.leave(self.profile);

        match response {
            Scripted::Fail(error) => {
                self.source = None;
                Err(error)
            }
            Scripted::Page(html) => {
                let source = PageSource::new(url, html);
                let satisfied = wait.is_satisfied_by(&source);
                self.source = Some(source);
                if satisfied {
                    Ok(())
                } else {
                    Err(NavigationError::ConditionTimeout {
                        url: url.to_string(),
                        timeout: wait.timeout,
                    })
                }
            }
        }
    }

    fn source(&self) -> Option<&PageSource> {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn wait() -> WaitPolicy {
        WaitPolicy::load(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_serves_pages_and_records_navigation() {
        let renderer = MemoryRenderer::new();
        renderer.page("https://x/1", "<p>hello</p>");

        let mut session = renderer.open(SessionProfile::ListScan, "ua").await.unwrap();
        session.navigate("https://x/1", &wait()).await.unwrap();

        let text = session.extract(|doc| doc.body_text()).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(renderer.navigation_count("https://x/1"), 1);
        assert_eq!(renderer.navigations()[0].profile, SessionProfile::ListScan);
    }

    #[tokio::test]
    async fn test_script_sequence_repeats_last() {
        let renderer = MemoryRenderer::new();
        renderer.script(
            "u",
            vec![
                Scripted::Fail(NavigationError::Timeout {
                    url: "u".to_string(),
                    timeout: Duration::from_secs(1),
                }),
                Scripted::Page("ok".to_string()),
            ],
        );

        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();
        assert!(session.navigate("u", &wait()).await.is_err());
        assert!(session.source().is_none());
        assert!(session.navigate("u", &wait()).await.is_ok());
        assert!(session.navigate("u", &wait()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_url_is_404() {
        let renderer = MemoryRenderer::new();
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();
        let err = session.navigate("nope", &wait()).await.unwrap_err();
        assert_eq!(
            err,
            NavigationError::Status {
                url: "nope".to_string(),
                status: 404
            }
        );
    }

    #[tokio::test]
    async fn test_condition_timeout_keeps_source() {
        let renderer = MemoryRenderer::new();
        renderer.page("u", "<div class='a'></div>");

        let policy = wait().require(Selector::parse(".b").unwrap());
        let mut session = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();
        let err = session.navigate("u", &policy).await.unwrap_err();

        assert!(matches!(err, NavigationError::ConditionTimeout { .. }));
        assert!(session.source().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracks_peak_concurrency() {
        let renderer = MemoryRenderer::new();
        renderer.page("u", "x").set_latency(Duration::from_millis(100));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let renderer = renderer.clone();
            handles.push(tokio::spawn(async move {
                let mut s = renderer.open(SessionProfile::Metadata, "ua").await.unwrap();
                s.navigate("u", &WaitPolicy::load(Duration::from_secs(1))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(renderer.peak_concurrency(SessionProfile::Metadata), 3);
        assert_eq!(renderer.peak_concurrency(SessionProfile::ListScan), 0);
        assert_eq!(renderer.peak_total(), 3);
    }
}
