use crate::state::coordinate::partition_rank;
use crate::state::{Record, WorkCoordinate};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Running detail-fetch counters carried across runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub attempts: u64,
    pub successes: u64,
}

impl CrawlStats {
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
    }

    /// Fraction of attempts that succeeded; 0.0 when nothing was attempted
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// The whole accumulated state of a crawl
///
/// Owned by the scheduler (through [`crate::state::Merger`]); the store only
/// serializes and deserializes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlState {
    pub records: Vec<Record>,
    pub completed: HashSet<WorkCoordinate>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub stats: CrawlStats,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.completed.is_empty()
    }

    pub fn is_complete(&self, coordinate: &WorkCoordinate) -> bool {
        self.completed.contains(coordinate)
    }

    /// Records discovered on the given coordinate
    pub fn records_on<'a>(
        &'a self,
        coordinate: &'a WorkCoordinate,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.partition == coordinate.partition && r.page_index == coordinate.page)
    }

    pub fn unresolved_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_unresolved()).count()
    }

    /// Sorts records by partition order, page, category, then display name
    pub fn sort_records(&mut self, order: &[String]) {
        self.records.sort_by(|a, b| compare_records(a, b, order));
    }

    /// Completed coordinates ordered by partition order, then page
    pub fn sorted_coordinates(&self, order: &[String]) -> Vec<WorkCoordinate> {
        let mut coordinates: Vec<WorkCoordinate> = self.completed.iter().cloned().collect();
        coordinates.sort_by(|a, b| a.cmp_with_order(b, order));
        coordinates
    }
}

fn compare_records(a: &Record, b: &Record, order: &[String]) -> Ordering {
    partition_rank(&a.partition, order)
        .cmp(&partition_rank(&b.partition, order))
        .then_with(|| a.page_index.cmp(&b.page_index))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.display_name.cmp(&b.display_name))
}
