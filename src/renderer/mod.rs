//! Page renderer abstraction and session pool
//!
//! A renderer opens sessions; a session navigates to a URL, waits for a
//! condition, and exposes the loaded document for read-only extraction.
//!
//! # Components
//!
//! - `Renderer` / `Session`: the capability traits
//! - `RendererPool`: bounded leasing with periodic engine recycling
//! - `HttpRenderer`: reqwest-backed renderer for server-rendered pages
//! - `MemoryRenderer`: scripted in-process renderer for tests and replays

mod document;
mod http;
mod memory;
mod pool;

pub use document::{element_text, Document, PageSource, ResourceClass, SessionProfile, WaitPolicy};
pub use http::{HttpRenderer, HttpSession};
pub use memory::{MemoryRenderer, MemorySession, NavigationRecord, Scripted};
pub use pool::{IdentityPool, Lease, RendererPool};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a page
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Wait condition on {url} not met within {timeout:?}")]
    ConditionTimeout { url: String, timeout: Duration },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Blocked at {url}: {reason}")]
    Blocked { url: String, reason: String },

    #[error("Network down while loading {url}: {message}")]
    NetworkDown { url: String, message: String },
}

impl NavigationError {
    /// Connectivity is gone; the whole crawl should back off
    pub fn is_network_down(&self) -> bool {
        matches!(self, Self::NetworkDown { .. })
    }

    /// Failure local to one page that a later attempt may clear
    pub fn is_retryable(&self) -> bool {
        !self.is_network_down()
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::ConditionTimeout { url, .. }
            | Self::Transport { url, .. }
            | Self::Status { url, .. }
            | Self::Blocked { url, .. }
            | Self::NetworkDown { url, .. } => url,
        }
    }
}

/// A leased page-loading context
#[async_trait]
pub trait Session: Send {
    /// Loads `url` and waits according to `wait`
    ///
    /// On [`NavigationError::ConditionTimeout`] the last loaded source is kept, so
    /// callers may still extract whatever did render.
    async fn navigate(&mut self, url: &str, wait: &WaitPolicy) -> Result<(), NavigationError>;

    /// The currently loaded page, if any
    fn source(&self) -> Option<&PageSource>;

    /// Runs read-only extraction logic against the loaded document
    fn extract<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&Document) -> T,
        Self: Sized,
    {
        self.source().map(|source| f(&Document::parse(source)))
    }
}

/// A page-rendering engine that hands out sessions
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Opens a session presenting `identity` and filtering per `profile`
    async fn open(
        &self,
        profile: SessionProfile,
        identity: &str,
    ) -> Result<Self::Session, NavigationError>;

    /// Restarts the underlying engine to release accumulated resources
    async fn recycle(&self) -> Result<(), NavigationError>;

    /// Releases the engine for good
    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let down = NavigationError::NetworkDown {
            url: "u".to_string(),
            message: "dns".to_string(),
        };
        let timeout = NavigationError::Timeout {
            url: "u".to_string(),
            timeout: Duration::from_secs(1),
        };
        let blocked = NavigationError::Blocked {
            url: "u".to_string(),
            reason: "HTTP 429".to_string(),
        };

        assert!(down.is_network_down());
        assert!(!down.is_retryable());
        assert!(timeout.is_retryable());
        assert!(blocked.is_retryable());
        assert!(blocked.is_blocked());
        assert_eq!(timeout.url(), "u");
    }
}
