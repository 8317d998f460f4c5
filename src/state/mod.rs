//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `WorkCoordinate` / `CoordinateState`: one list page and its lifecycle
//! - `Record` / `CandidateItem`: enriched and provisional items
//! - `CrawlState`: the accumulated records, completed coordinates, and stats
//! - `PartitionState`: per-partition page cursor
//! - `Merger`: identity-keyed deduplication and the single writer of `CrawlState`

mod coordinate;
mod crawl_state;
mod merger;
mod partition_state;
mod record;

// Re-export main types
pub use coordinate::{partition_rank, CoordinateState, WorkCoordinate};
pub use crawl_state::{CrawlState, CrawlStats};
pub use merger::{MergeOutcome, MergeSummary, Merger, SanitizePolicy, SanitizeReport};
pub use partition_state::PartitionState;
pub use record::{
    composite_description, is_unresolved_category, normalize_attribution, CandidateItem, Record,
    LEGACY_UNRESOLVED, UNRESOLVED,
};
