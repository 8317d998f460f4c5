//! Output module for reports, exports, and side effects of checkpoints
//!
//! This module handles:
//! - Statistics and markdown summaries of the persisted crawl
//! - SQLite export of records and completed coordinates
//! - Batch maintenance (clean, organize, search, recover) over the document format
//! - Diagnostic page captures and the post-checkpoint sync hook

mod diagnostics;
pub mod maintenance;
mod markdown;
mod sqlite_output;
pub mod stats;
mod sync;

pub use diagnostics::DiagnosticsWriter;
pub use maintenance::{
    clean, organize, print_recovery, print_search_results, recover, search, OrganizeReport,
    DEFAULT_SEARCH_LIMIT,
};
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use sqlite_output::{ExportSummary, SqliteExporter, EXPORT_SCHEMA_SQL};
pub use stats::{compute_statistics, load_statistics, print_statistics, CrawlStatistics, PartitionStatistics};
pub use sync::{CheckpointHook, CommandHook, STATE_PATH_ENV, SYNC_TOKEN_ENV};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to format output: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
