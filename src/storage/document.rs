use crate::state::{CrawlState, CrawlStats, Record, WorkCoordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// On-disk shape of the crawl state
///
/// Older documents named these fields `totalCards`, `processedPages` and `cards`;
/// both spellings are read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default, alias = "totalCards")]
    pub total_records: usize,

    #[serde(default, alias = "processedPages")]
    pub completed_coordinates: Vec<String>,

    #[serde(default, alias = "cards")]
    pub records: Vec<Record>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DocumentStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub success_rate: f64,
    pub total_attempts: u64,
    pub successful_attempts: u64,
}

impl StateDocument {
    /// Builds a sorted document from the in-memory state
    pub fn from_state(state: &CrawlState, order: &[String]) -> Self {
        let mut sorted = state.clone();
        sorted.sort_records(order);

        let stats = (state.stats.attempts > 0).then(|| DocumentStats {
            success_rate: state.stats.success_rate(),
            total_attempts: state.stats.attempts,
            successful_attempts: state.stats.successes,
        });

        Self {
            total_records: sorted.records.len(),
            completed_coordinates: state
                .sorted_coordinates(order)
                .iter()
                .map(WorkCoordinate::key)
                .collect(),
            records: sorted.records,
            last_updated: Some(Utc::now()),
            stats,
        }
    }

    /// Converts back into crawl state
    ///
    /// Coordinate strings that do not parse are skipped with a warning.
    pub fn into_state(self) -> CrawlState {
        let completed = self
            .completed_coordinates
            .iter()
            .filter_map(|key| match key.parse::<WorkCoordinate>() {
                Ok(coordinate) => Some(coordinate),
                Err(e) => {
                    warn!("Ignoring completed coordinate: {}", e);
                    None
                }
            })
            .collect();

        let stats = self
            .stats
            .map(|s| CrawlStats {
                attempts: s.total_attempts,
                successes: s.successful_attempts,
            })
            .unwrap_or_default();

        CrawlState {
            records: self.records,
            completed,
            last_checkpoint_at: self.last_updated,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CandidateItem;

    #[test]
    fn test_from_state_sorts_and_counts() {
        let order = vec!["1".to_string(), "2".to_string()];
        let mut state = CrawlState::new();
        for (id, partition, page) in [("b", "2", 1), ("a", "1", 3), ("c", "1", 1)] {
            let item = CandidateItem::new(id, "d", id);
            state.records.push(Record::enriched(
                &item,
                &WorkCoordinate::new(partition, page),
                "Cat",
                "x",
            ));
        }
        state.completed.insert(WorkCoordinate::new("2", 1));
        state.completed.insert(WorkCoordinate::new("1", 10));
        state.completed.insert(WorkCoordinate::new("1", 9));
        state.stats.record(true);
        state.stats.record(false);

        let doc = StateDocument::from_state(&state, &order);

        assert_eq!(doc.total_records, 3);
        assert_eq!(doc.completed_coordinates, vec!["1-9", "1-10", "2-1"]);
        let ids: Vec<&str> = doc.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(doc.stats.unwrap().total_attempts, 2);
        assert!(doc.last_updated.is_some());
    }

    #[test]
    fn test_reads_legacy_document() {
        let json = r#"{
            "totalCards": 1,
            "processedPages": ["1-1", "S-2", "garbage"],
            "cards": [{"imageUrl": "https://cdn/a.png", "cardName": "A", "animeName": "X", "tier": "1", "page": 1}],
            "lastUpdated": "2024-05-01T10:00:00.000Z"
        }"#;

        let doc: StateDocument = serde_json::from_str(json).unwrap();
        let state = doc.into_state();

        assert_eq!(state.records.len(), 1);
        assert_eq!(state.completed.len(), 2);
        assert!(state.is_complete(&WorkCoordinate::new("S", 2)));
        assert!(state.last_checkpoint_at.is_some());
        assert_eq!(state.stats, CrawlStats::default());
    }

    #[test]
    fn test_stats_omitted_when_nothing_attempted() {
        let doc = StateDocument::from_state(&CrawlState::new(), &[]);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("stats").is_none());
        assert_eq!(json["totalRecords"], 0);
    }
}
