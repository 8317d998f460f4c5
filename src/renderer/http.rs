//! HTTP-backed renderer
//!
//! Loads pages with reqwest and treats the response body as the rendered
//! document. Wait conditions are polled by re-fetching until every selector
//! matches or the deadline passes. Sub-resources are never fetched, so resource
//! filtering is implicit.

use crate::config::RendererConfig;
use crate::renderer::{NavigationError, PageSource, Renderer, Session, SessionProfile, WaitPolicy};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

/// Builds the shared HTTP client
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

pub struct HttpRenderer {
    client: RwLock<Client>,
    blocked_markers: Arc<Vec<String>>,
    poll_interval: Duration,
    generation: AtomicU64,
}

impl HttpRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self, NavigationError> {
        let client = build_http_client().map_err(|e| NavigationError::Transport {
            url: String::new(),
            message: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client: RwLock::new(client),
            blocked_markers: Arc::new(
                config
                    .blocked_markers
                    .iter()
                    .map(|m| m.to_lowercase())
                    .collect(),
            ),
            poll_interval: config.poll_interval(),
            generation: AtomicU64::new(0),
        })
    }

    /// Number of times the client has been rebuilt
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn current_client(&self) -> Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    type Session = HttpSession;

    async fn open(
        &self,
        profile: SessionProfile,
        identity: &str,
    ) -> Result<HttpSession, NavigationError> {
        Ok(HttpSession {
            client: self.current_client(),
            user_agent: identity.to_string(),
            profile,
            blocked_markers: self.blocked_markers.clone(),
            poll_interval: self.poll_interval,
            source: None,
        })
    }

    async fn recycle(&self) -> Result<(), NavigationError> {
        let fresh = build_http_client().map_err(|e| NavigationError::Transport {
            url: String::new(),
            message: format!("failed to rebuild HTTP client: {}", e),
        })?;

        // Sessions already leased keep their own handle to the old client
        match self.client.write() {
            Ok(mut client) => *client = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "HTTP client rebuilt");
        Ok(())
    }
}

pub struct HttpSession {
    client: Client,
    user_agent: String,
    profile: SessionProfile,
    blocked_markers: Arc<Vec<String>>,
    poll_interval: Duration,
    source: Option<PageSource>,
}

impl HttpSession {
    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    async fn fetch(&self, url: &str) -> Result<PageSource, NavigationError> {
        let mut request = self.client.get(url);
        if !self.user_agent.is_empty() {
            request = request.header(header::USER_AGENT, &self.user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(NavigationError::Blocked {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        if !status.is_success() {
            return Err(NavigationError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        if let Some(marker) = find_blocked_marker(&html, &self.blocked_markers) {
            return Err(NavigationError::Blocked {
                url: url.to_string(),
                reason: format!("page contains '{}'", marker),
            });
        }

        Ok(PageSource {
            url: final_url,
            status: status.as_u16(),
            html,
        })
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn navigate(&mut self, url: &str, wait: &WaitPolicy) -> Result<(), NavigationError> {
        self.source = None;
        let deadline = Instant::now() + wait.timeout;
        let poll = if wait.poll_interval.is_zero() {
            self.poll_interval
        } else {
            wait.poll_interval
        };

        loop {
            let source = match timeout_at(deadline, self.fetch(url)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(match self.source {
                        Some(_) => NavigationError::ConditionTimeout {
                            url: url.to_string(),
                            timeout: wait.timeout,
                        },
                        None => NavigationError::Timeout {
                            url: url.to_string(),
                            timeout: wait.timeout,
                        },
                    })
                }
            };

            if !wait.settle.is_zero() {
                sleep(wait.settle).await;
            }

            let satisfied = wait.is_satisfied_by(&source);
            self.source = Some(source);
            if satisfied {
                return Ok(());
            }

            if Instant::now() + poll >= deadline {
                return Err(NavigationError::ConditionTimeout {
                    url: url.to_string(),
                    timeout: wait.timeout,
                });
            }
            sleep(poll).await;
        }
    }

    fn source(&self) -> Option<&PageSource> {
        self.source.as_ref()
    }
}

/// Maps a reqwest failure onto the navigation error taxonomy
///
/// Connection-level failures (refused, DNS, unreachable) mean connectivity is
/// gone and escalate to `NetworkDown`.
fn classify_reqwest_error(url: &str, error: &reqwest::Error) -> NavigationError {
    if error.is_connect() {
        NavigationError::NetworkDown {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else if error.is_timeout() {
        NavigationError::Timeout {
            url: url.to_string(),
            timeout: Duration::ZERO,
        }
    } else {
        NavigationError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

fn find_blocked_marker<'a>(html: &str, markers: &'a [String]) -> Option<&'a str> {
    if markers.is_empty() {
        return None;
    }
    let lowered = html.to_lowercase();
    markers
        .iter()
        .find(|m| !m.is_empty() && lowered.contains(m.as_str()))
        .map(String::as_str)
}
