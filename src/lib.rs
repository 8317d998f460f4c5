//! Gleaner: a resumable crawl-and-enrich engine
//!
//! This crate walks paginated listing sites partition by partition, enriches every
//! discovered item from its detail page, and checkpoints the growing record set to a
//! single JSON document so an interrupted crawl picks up where it stopped.

pub mod config;
pub mod crawler;
pub mod output;
pub mod renderer;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Gleaner operations
#[derive(Debug, Error)]
pub enum GleanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Navigation error: {0}")]
    Navigation(#[from] renderer::NavigationError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Persisted state is unreadable across the whole backup chain: {0}")]
    CorruptState(String),

    #[error("Renderer pool exhausted ({max_sessions} sessions in use)")]
    PoolExhausted { max_sessions: usize },

    #[error("Renderer pool is shut down")]
    PoolClosed,

    #[error("Invalid state transition for {coordinate}: {from:?} -> {to:?}")]
    InvalidTransition {
        coordinate: String,
        from: state::CoordinateState,
        to: state::CoordinateState,
    },

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Invalid environment override {key}={value}: {message}")]
    InvalidEnv {
        key: String,
        value: String,
        message: String,
    },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Gleaner operations
pub type Result<T> = std::result::Result<T, GleanError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{CandidateItem, CoordinateState, CrawlState, Merger, Record, WorkCoordinate};
pub use storage::{JsonStore, StateStore};
