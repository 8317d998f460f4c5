//! Statistics over a persisted crawl state
//!
//! This module provides functionality for computing and displaying crawl
//! statistics from the state document, measured against the configured
//! partition bounds.

use crate::config::PartitionEntry;
use crate::output::OutputResult;
use crate::state::{partition_rank, CrawlState};
use crate::storage::{JsonStore, StateStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-partition progress
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStatistics {
    pub name: String,

    /// Pages in `completedCoordinates` for this partition
    pub completed_pages: usize,

    /// Configured page count, if the partition is bounded
    pub planned_pages: Option<u32>,

    pub records: usize,
    pub unresolved: usize,
}

impl PartitionStatistics {
    /// Completed share of the planned pages, in percent
    pub fn completion_percent(&self) -> Option<f64> {
        match self.planned_pages {
            Some(0) | None => None,
            Some(planned) => Some((self.completed_pages as f64 / planned as f64 * 100.0).min(100.0)),
        }
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub total_records: usize,
    pub completed_pages: usize,
    pub unresolved_records: usize,

    /// Detail fetch attempts and successes across all runs
    pub attempts: u64,
    pub successes: u64,

    pub last_updated: Option<DateTime<Utc>>,

    /// Configured partitions first, in crawl order, then any others found in the state
    pub partitions: Vec<PartitionStatistics>,

    /// Categories by record count, largest first
    pub top_categories: Vec<(String, usize)>,

    /// Attribution names by record count, largest first
    pub top_attributions: Vec<(String, usize)>,
}

impl CrawlStatistics {
    /// Fraction of detail fetch attempts that succeeded, in percent
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64 * 100.0)
    }

    /// Completed share of all planned pages, in percent
    ///
    /// Only meaningful when every configured partition is bounded.
    pub fn completion_percent(&self) -> Option<f64> {
        let mut planned = 0u64;
        let mut completed = 0u64;
        for partition in &self.partitions {
            planned += u64::from(partition.planned_pages?);
            completed += partition.completed_pages as u64;
        }
        (planned > 0).then(|| (completed as f64 / planned as f64 * 100.0).min(100.0))
    }
}

/// Computes statistics for `state` against the configured partitions
pub fn compute_statistics(state: &CrawlState, partitions: &[PartitionEntry]) -> CrawlStatistics {
    let order: Vec<String> = partitions.iter().map(|p| p.name.clone()).collect();

    let mut by_partition: HashMap<&str, PartitionStatistics> = partitions
        .iter()
        .map(|entry| {
            (
                entry.name.as_str(),
                PartitionStatistics {
                    name: entry.name.clone(),
                    completed_pages: 0,
                    planned_pages: entry.page_count(),
                    records: 0,
                    unresolved: 0,
                },
            )
        })
        .collect();

    let blank = |name: &str| PartitionStatistics {
        name: name.to_string(),
        completed_pages: 0,
        planned_pages: None,
        records: 0,
        unresolved: 0,
    };

    for coordinate in &state.completed {
        by_partition
            .entry(coordinate.partition.as_str())
            .or_insert_with(|| blank(&coordinate.partition))
            .completed_pages += 1;
    }

    let mut categories: HashMap<&str, usize> = HashMap::new();
    let mut attributions: HashMap<&str, usize> = HashMap::new();
    for record in &state.records {
        let entry = by_partition
            .entry(record.partition.as_str())
            .or_insert_with(|| blank(&record.partition));
        entry.records += 1;
        if record.is_unresolved() {
            entry.unresolved += 1;
        } else {
            *categories.entry(record.category.as_str()).or_default() += 1;
        }
        *attributions.entry(record.attribution_name.as_str()).or_default() += 1;
    }

    let mut partitions: Vec<PartitionStatistics> = by_partition.into_values().collect();
    partitions.sort_by(|a, b| partition_rank(&a.name, &order).cmp(&partition_rank(&b.name, &order)));

    CrawlStatistics {
        total_records: state.records.len(),
        completed_pages: state.completed.len(),
        unresolved_records: state.unresolved_count(),
        attempts: state.stats.attempts,
        successes: state.stats.successes,
        last_updated: state.last_checkpoint_at,
        partitions,
        top_categories: ranked(categories),
        top_attributions: ranked(attributions),
    }
}

/// Loads the canonical document and computes its statistics
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Statistics, empty if no document exists yet
/// * `Err(OutputError)` - The document could not be read
pub fn load_statistics(store: &JsonStore, partitions: &[PartitionEntry]) -> OutputResult<CrawlStatistics> {
    let state = store.load()?;
    Ok(compute_statistics(&state, partitions))
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!("  Completed pages: {}", stats.completed_pages);
    println!("  Unresolved records: {}", stats.unresolved_records);
    if let Some(updated) = stats.last_updated {
        println!("  Last updated: {}", updated.to_rfc3339());
    }
    if let Some(percent) = stats.completion_percent() {
        println!("  Overall completion: {:.1}%", percent);
    }
    println!();

    println!("Partitions:");
    for partition in &stats.partitions {
        let progress = match (partition.planned_pages, partition.completion_percent()) {
            (Some(planned), Some(percent)) => {
                format!("{}/{} pages ({:.1}%)", partition.completed_pages, planned, percent)
            }
            _ => format!("{} pages", partition.completed_pages),
        };
        println!(
            "  {:<8} {:<24} {} records, {} unresolved",
            partition.name, progress, partition.records, partition.unresolved
        );
    }
    println!();

    if !stats.top_categories.is_empty() {
        println!("Top Categories:");
        for (category, count) in stats.top_categories.iter().take(10) {
            println!("  {}: {}", category, count);
        }
        println!();
    }

    match stats.success_rate() {
        Some(rate) => println!(
            "Success Rate: {:.1}% ({} / {} detail fetches)",
            rate, stats.successes, stats.attempts
        ),
        None => println!("Success Rate: n/a (no detail fetches recorded)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CandidateItem, Record, WorkCoordinate, UNRESOLVED};

    fn record(partition: &str, page: u32, id: u32, category: &str) -> Record {
        let item = CandidateItem::new(format!("https://cdn/{}.png", id), "d", format!("Card {}", id));
        Record::enriched(&item, &WorkCoordinate::new(partition, page), category, "Kira")
    }

    fn state() -> CrawlState {
        let mut state = CrawlState::new();
        state.records = vec![
            record("1", 1, 1, "Naruto"),
            record("1", 1, 2, "Naruto"),
            record("1", 2, 3, UNRESOLVED),
            record("S", 1, 4, "Bleach"),
        ];
        state.completed = [
            WorkCoordinate::new("1", 1),
            WorkCoordinate::new("1", 2),
            WorkCoordinate::new("S", 1),
            WorkCoordinate::new("X", 3),
        ]
        .into_iter()
        .collect();
        state.stats.attempts = 10;
        state.stats.successes = 8;
        state
    }

    #[test]
    fn test_per_partition_completion() {
        let partitions = vec![PartitionEntry::new("S", 1, Some(2)), PartitionEntry::new("1", 1, Some(4))];
        let stats = compute_statistics(&state(), &partitions);

        let names: Vec<_> = stats.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["S", "1", "X"]);

        let tier_one = &stats.partitions[1];
        assert_eq!(tier_one.completed_pages, 2);
        assert_eq!(tier_one.records, 3);
        assert_eq!(tier_one.unresolved, 1);
        assert_eq!(tier_one.completion_percent(), Some(50.0));

        assert_eq!(stats.partitions[2].planned_pages, None);
        assert_eq!(stats.partitions[2].completion_percent(), None);
    }

    #[test]
    fn test_totals_and_rates() {
        let partitions = vec![PartitionEntry::new("S", 1, Some(2)), PartitionEntry::new("1", 1, Some(4))];
        let stats = compute_statistics(&state(), &partitions);

        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.unresolved_records, 1);
        assert_eq!(stats.success_rate(), Some(80.0));
        assert_eq!(stats.top_categories[0], ("Naruto".to_string(), 2));
        // The unbounded stray partition makes the overall figure meaningless
        assert_eq!(stats.completion_percent(), None);
    }

    #[test]
    fn test_empty_state() {
        let stats = compute_statistics(&CrawlState::new(), &[PartitionEntry::new("1", 1, Some(3))]);
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.completion_percent(), Some(0.0));
    }
}
