//! Storage module for persisting crawl state
//!
//! This module handles durable persistence of the crawl state, including:
//! - The JSON state document and its legacy field names
//! - Atomic replace-by-rename saves with an at-most-one-active-save guard
//! - Backup copies and periodic timestamped snapshots
//! - Loading through the backup chain when the canonical file is unreadable

mod document;
mod json;
mod traits;

pub use document::{DocumentStats, StateDocument};
pub use json::{ChainEntry, JsonStore, LoadReport, LoadSource};
pub use traits::{SaveOutcome, StateStore, StorageError, StorageResult};
