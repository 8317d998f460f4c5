//! Storage traits and error types
//!
//! This module defines the trait interface for state stores and
//! associated error types.

use crate::state::CrawlState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("State file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Every file in the backup chain is unreadable: {0}")]
    ChainExhausted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to move temporary file into place: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background save did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What a call to [`StateStore::save`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The canonical document was replaced
    Written,
    /// Another save was already in progress; nothing was written
    Skipped,
}

/// Trait for crawl state persistence
///
/// Implementations must make `save` atomic: readers observe either the previous
/// document or the new one, never a partial write. Overlapping calls are
/// serialized by skipping, so at most one save is active at any time.
pub trait StateStore {
    /// Loads the canonical state
    ///
    /// A missing store yields an empty state. An unreadable one fails with
    /// [`StorageError::Corrupt`].
    fn load(&self) -> StorageResult<CrawlState>;

    /// Durably replaces the canonical state
    fn save(&self, state: &CrawlState) -> StorageResult<SaveOutcome>;
}
