//! Identity-keyed deduplication and folding of records into the crawl state
//!
//! The merger is the only writer of [`CrawlState`]. It keeps an identity index so
//! membership checks are O(1), and it upgrades a previously unresolved record in
//! place when a resolved version of the same identity arrives.

use crate::state::record::normalize_attribution;
use crate::state::{CrawlState, Record, WorkCoordinate};
use std::collections::HashMap;
use tracing::{debug, info};

/// Result of folding a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New identity appended
    Added,
    /// Replaced an unresolved record with the same identity
    Upgraded,
    /// Identity already present and resolved, or the new record is no better
    Skipped,
}

/// Aggregate of a batch merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub upgraded: usize,
    pub skipped: usize,
}

impl MergeSummary {
    fn count(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Added => self.added += 1,
            MergeOutcome::Upgraded => self.upgraded += 1,
            MergeOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What load-time sanitation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub dropped: usize,
    pub reopened: usize,
    pub normalized: usize,
    pub described: usize,
}

/// Rules applied to persisted records on load
#[derive(Debug, Clone)]
pub struct SanitizePolicy {
    /// Keep unresolved records instead of dropping them
    pub lenient: bool,
    pub anonymous_name: String,
    pub anonymous_markers: Vec<String>,
}

pub struct Merger {
    state: CrawlState,
    index: HashMap<String, usize>,
}

impl Merger {
    /// Builds the identity index over a loaded state
    ///
    /// Duplicate identities in the input collapse to one record, preferring a
    /// resolved one.
    pub fn new(state: CrawlState) -> Self {
        let CrawlState {
            records,
            completed,
            last_checkpoint_at,
            stats,
        } = state;

        let mut merger = Self {
            state: CrawlState {
                records: Vec::with_capacity(records.len()),
                completed,
                last_checkpoint_at,
                stats,
            },
            index: HashMap::with_capacity(records.len()),
        };

        let summary = merger.merge(records);
        if summary.skipped > 0 || summary.upgraded > 0 {
            debug!(
                duplicates = summary.skipped + summary.upgraded,
                "Collapsed duplicate identities in loaded state"
            );
        }
        merger
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn into_state(self) -> CrawlState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    pub fn is_known(&self, identity: &str) -> bool {
        self.index.contains_key(identity)
    }

    /// Returns true if the identity is unknown or only known as unresolved
    pub fn needs_fetch(&self, identity: &str) -> bool {
        match self.index.get(identity) {
            None => true,
            Some(&i) => self.state.records[i].is_unresolved(),
        }
    }

    /// Folds one record into the state
    pub fn fold(&mut self, record: Record) -> MergeOutcome {
        match self.index.get(&record.identity) {
            None => {
                self.index
                    .insert(record.identity.clone(), self.state.records.len());
                self.state.records.push(record);
                MergeOutcome::Added
            }
            Some(&i) => {
                let existing = &mut self.state.records[i];
                if existing.is_unresolved() && !record.is_unresolved() {
                    *existing = record;
                    MergeOutcome::Upgraded
                } else {
                    MergeOutcome::Skipped
                }
            }
        }
    }

    /// Folds a batch, appending only identities not already known
    pub fn merge(&mut self, records: impl IntoIterator<Item = Record>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in records {
            summary.count(self.fold(record));
        }
        summary
    }

    pub fn is_complete(&self, coordinate: &WorkCoordinate) -> bool {
        self.state.is_complete(coordinate)
    }

    /// Marks a coordinate complete; returns false if it already was
    pub fn mark_complete(&mut self, coordinate: WorkCoordinate) -> bool {
        self.state.completed.insert(coordinate)
    }

    /// Removes a coordinate from the completed set; returns true if it was present
    pub fn reopen(&mut self, coordinate: &WorkCoordinate) -> bool {
        self.state.completed.remove(coordinate)
    }

    pub fn record_attempt(&mut self, success: bool) {
        self.state.stats.record(success);
    }

    pub fn touch_checkpoint(&mut self) {
        self.state.last_checkpoint_at = Some(chrono::Utc::now());
    }

    /// Fills unresolved categories from resolved records with the same display name
    ///
    /// Names are compared trimmed and lowercased. Returns the number of records fixed.
    pub fn backfill_categories(&mut self) -> usize {
        let mut by_name: HashMap<String, String> = HashMap::new();
        for record in self.state.records.iter().filter(|r| !r.is_unresolved()) {
            by_name
                .entry(name_key(&record.display_name))
                .or_insert_with(|| record.category.clone());
        }

        let mut fixed = 0;
        for record in self.state.records.iter_mut().filter(|r| r.is_unresolved()) {
            if let Some(category) = by_name.get(&name_key(&record.display_name)) {
                record.category = category.clone();
                record.refresh_description();
                fixed += 1;
            }
        }

        if fixed > 0 {
            info!(fixed, "Backfilled categories from matching display names");
        }
        fixed
    }

    /// Cleans persisted records before a crawl resumes
    ///
    /// In strict mode unresolved records are dropped and their coordinates reopened.
    /// Placeholder attributions are normalized and missing descriptions rebuilt.
    pub fn sanitize(&mut self, policy: &SanitizePolicy) -> SanitizeReport {
        let mut report = SanitizeReport::default();

        if !policy.lenient {
            let (kept, dropped): (Vec<Record>, Vec<Record>) = std::mem::take(&mut self.state.records)
                .into_iter()
                .partition(|r| !r.is_unresolved());

            for record in &dropped {
                if self.state.completed.remove(&record.coordinate()) {
                    report.reopened += 1;
                }
            }
            report.dropped = dropped.len();
            self.state.records = kept;
        }

        for record in &mut self.state.records {
            let normalized = normalize_attribution(
                &record.attribution_name,
                &policy.anonymous_name,
                &policy.anonymous_markers,
            );
            if normalized != record.attribution_name {
                record.attribution_name = normalized;
                report.normalized += 1;
            }

            if record.composite_description.trim().is_empty() {
                record.refresh_description();
                report.described += 1;
            }
        }

        self.rebuild_index();

        if report.dropped > 0 {
            info!(
                dropped = report.dropped,
                reopened = report.reopened,
                "Removed unresolved records; their pages will be re-scanned"
            );
        }
        report
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .state
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.identity.clone(), i))
            .collect();
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CandidateItem, UNRESOLVED};

    fn resolved(identity: &str, name: &str, category: &str, page: u32) -> Record {
        let item = CandidateItem::new(identity, format!("https://site/card/{}", identity), name);
        Record::enriched(&item, &WorkCoordinate::new("A", page), category, "maker")
    }

    fn unresolved(identity: &str, name: &str, page: u32) -> Record {
        resolved(identity, name, UNRESOLVED, page)
    }

    fn policy(lenient: bool) -> SanitizePolicy {
        SanitizePolicy {
            lenient,
            anonymous_name: "Anonymous".to_string(),
            anonymous_markers: vec!["Official".to_string(), "Requested by".to_string()],
        }
    }

    #[test]
    fn test_merge_appends_only_unknown() {
        let mut merger = Merger::new(CrawlState::new());

        let summary = merger.merge(vec![
            resolved("a", "A", "X", 1),
            resolved("b", "B", "X", 1),
            resolved("a", "A again", "Y", 2),
        ]);

        assert_eq!(summary.added, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(merger.len(), 2);
        assert!(merger.is_known("a"));
        assert!(!merger.is_known("c"));
        assert_eq!(merger.state().records[0].category, "X");
    }

    #[test]
    fn test_resolved_upgrades_unresolved_in_place() {
        let mut merger = Merger::new(CrawlState::new());
        merger.fold(unresolved("a", "A", 1));
        merger.fold(resolved("b", "B", "X", 1));

        assert!(merger.needs_fetch("a"));
        assert!(!merger.needs_fetch("b"));
        assert!(merger.needs_fetch("new"));

        assert_eq!(merger.fold(resolved("a", "A", "Y", 1)), MergeOutcome::Upgraded);
        assert_eq!(merger.len(), 2);
        assert_eq!(merger.state().records[0].category, "Y");
        assert!(!merger.needs_fetch("a"));

        // Unresolved never replaces resolved
        assert_eq!(merger.fold(unresolved("b", "B", 1)), MergeOutcome::Skipped);
        assert_eq!(merger.state().records[1].category, "X");
    }

    #[test]
    fn test_loaded_duplicates_collapse() {
        let mut state = CrawlState::new();
        state.records = vec![
            unresolved("a", "A", 1),
            resolved("a", "A", "X", 1),
            resolved("a", "A", "Z", 1),
        ];

        let merger = Merger::new(state);
        assert_eq!(merger.len(), 1);
        assert_eq!(merger.state().records[0].category, "X");
    }

    #[test]
    fn test_mark_complete_is_idempotent() {
        let mut merger = Merger::new(CrawlState::new());
        let coord = WorkCoordinate::new("A", 1);

        assert!(merger.mark_complete(coord.clone()));
        assert!(!merger.mark_complete(coord.clone()));
        assert!(merger.is_complete(&coord));
        assert!(merger.reopen(&coord));
        assert!(!merger.is_complete(&coord));
    }

    #[test]
    fn test_backfill_categories() {
        let mut merger = Merger::new(CrawlState::new());
        merger.fold(resolved("a", "Rem", "Re:Zero", 1));
        merger.fold(unresolved("b", "  rem ", 2));
        merger.fold(unresolved("c", "Nobody", 2));

        assert_eq!(merger.backfill_categories(), 1);

        let records = &merger.state().records;
        assert_eq!(records[1].category, "Re:Zero");
        assert_eq!(records[1].composite_description, "rem from Re:Zero");
        assert!(records[2].is_unresolved());
    }

    #[test]
    fn test_sanitize_strict_drops_and_reopens() {
        let mut state = CrawlState::new();
        state.records = vec![resolved("a", "A", "X", 1), unresolved("b", "B", 2)];
        state.completed.insert(WorkCoordinate::new("A", 1));
        state.completed.insert(WorkCoordinate::new("A", 2));

        let mut merger = Merger::new(state);
        let report = merger.sanitize(&policy(false));

        assert_eq!(report.dropped, 1);
        assert_eq!(report.reopened, 1);
        assert_eq!(merger.len(), 1);
        assert!(merger.is_complete(&WorkCoordinate::new("A", 1)));
        assert!(!merger.is_complete(&WorkCoordinate::new("A", 2)));
        assert!(!merger.is_known("b"));
        assert!(merger.is_known("a"));
    }

    #[test]
    fn test_sanitize_lenient_keeps_unresolved() {
        let mut state = CrawlState::new();
        state.records = vec![unresolved("b", "B", 2)];
        state.completed.insert(WorkCoordinate::new("A", 2));

        let mut merger = Merger::new(state);
        let report = merger.sanitize(&policy(true));

        assert_eq!(report.dropped, 0);
        assert_eq!(merger.len(), 1);
        assert!(merger.is_complete(&WorkCoordinate::new("A", 2)));
    }

    #[test]
    fn test_sanitize_normalizes_and_describes() {
        let mut record = resolved("a", "Asuna", "SAO", 1);
        record.attribution_name = "Requested by someone".to_string();
        record.composite_description = String::new();

        let mut state = CrawlState::new();
        state.records = vec![record];

        let mut merger = Merger::new(state);
        let report = merger.sanitize(&policy(false));

        assert_eq!(report.normalized, 1);
        assert_eq!(report.described, 1);
        let record = &merger.state().records[0];
        assert_eq!(record.attribution_name, "Anonymous");
        assert_eq!(record.composite_description, "Asuna from SAO");
    }
}
