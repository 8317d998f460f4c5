/// Work coordinates and their lifecycle
///
/// A coordinate is one list-scan unit of work: a page inside a partition.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Identifies one list page: `(partition, page)`
///
/// The canonical string form is `"<partition>-<page>"`. Partition names are free-form
/// tokens and may themselves contain dashes, so parsing splits on the last dash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkCoordinate {
    pub partition: String,
    pub page: u32,
}

impl WorkCoordinate {
    pub fn new(partition: impl Into<String>, page: u32) -> Self {
        Self {
            partition: partition.into(),
            page,
        }
    }

    /// Canonical key used in `completedCoordinates`
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Orders coordinates by a partition-order table, then page ascending
    ///
    /// Partitions missing from `order` sort after known ones, lexicographically.
    pub fn cmp_with_order(&self, other: &Self, order: &[String]) -> Ordering {
        partition_rank(&self.partition, order)
            .cmp(&partition_rank(&other.partition, order))
            .then_with(|| self.page.cmp(&other.page))
    }
}

/// Sort key for a partition name under a configured order
pub fn partition_rank<'a>(partition: &'a str, order: &[String]) -> (usize, &'a str) {
    match order.iter().position(|p| p == partition) {
        Some(index) => (index, ""),
        None => (order.len(), partition),
    }
}

impl fmt::Display for WorkCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.partition, self.page)
    }
}

impl FromStr for WorkCoordinate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (partition, page) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("coordinate '{}' has no '-' separator", s))?;

        if partition.is_empty() {
            return Err(format!("coordinate '{}' has an empty partition", s));
        }

        let page = page
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("coordinate '{}' has a bad page: {}", s, e))?;

        Ok(Self::new(partition, page))
    }
}

impl TryFrom<String> for WorkCoordinate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkCoordinate> for String {
    fn from(value: WorkCoordinate) -> Self {
        value.to_string()
    }
}

/// Lifecycle of a coordinate inside one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateState {
    /// Not yet attempted, or left for a later re-attempt
    Pending,

    /// List page is being loaded and its candidates extracted
    Scanning,

    /// Candidates are out for detail enrichment
    Enriching,

    /// Records folded and durably written; terminal
    Complete,
}

impl CoordinateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scanning | Self::Enriching)
    }

    /// Returns whether `self -> next` is a legal transition
    ///
    /// `Complete -> Complete` is allowed so re-completing is a no-op.
    pub fn can_transition_to(&self, next: CoordinateState) -> bool {
        use CoordinateState::*;
        matches!(
            (self, next),
            (Pending, Scanning)
                | (Scanning, Enriching)
                | (Scanning, Pending)
                | (Scanning, Complete)
                | (Enriching, Pending)
                | (Enriching, Complete)
                | (Complete, Complete)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scanning => "scanning",
            Self::Enriching => "enriching",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for CoordinateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let coord = WorkCoordinate::new("A", 12);
        assert_eq!(coord.to_string(), "A-12");
        assert_eq!("A-12".parse::<WorkCoordinate>().unwrap(), coord);
    }

    #[test]
    fn test_parse_partition_with_dash() {
        let coord: WorkCoordinate = "tier-s-3".parse().unwrap();
        assert_eq!(coord.partition, "tier-s");
        assert_eq!(coord.page, 3);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("A".parse::<WorkCoordinate>().is_err());
        assert!("-3".parse::<WorkCoordinate>().is_err());
        assert!("A-x".parse::<WorkCoordinate>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let coord = WorkCoordinate::new("S", 4);
        let json = serde_json::to_string(&coord).unwrap();
        assert_eq!(json, "\"S-4\"");
        let back: WorkCoordinate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coord);
    }

    #[test]
    fn test_ordering_by_partition_table() {
        let order = vec!["2".to_string(), "1".to_string()];
        let mut coords = vec![
            WorkCoordinate::new("1", 1),
            WorkCoordinate::new("zeta", 1),
            WorkCoordinate::new("2", 10),
            WorkCoordinate::new("2", 9),
            WorkCoordinate::new("alpha", 1),
        ];
        coords.sort_by(|a, b| a.cmp_with_order(b, &order));

        let keys: Vec<String> = coords.iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["2-9", "2-10", "1-1", "alpha-1", "zeta-1"]);
    }

    #[test]
    fn test_transitions() {
        use CoordinateState::*;

        assert!(Pending.can_transition_to(Scanning));
        assert!(Scanning.can_transition_to(Enriching));
        assert!(Scanning.can_transition_to(Complete));
        assert!(Scanning.can_transition_to(Pending));
        assert!(Enriching.can_transition_to(Complete));
        assert!(Enriching.can_transition_to(Pending));
        assert!(Complete.can_transition_to(Complete));

        assert!(!Pending.can_transition_to(Complete));
        assert!(!Pending.can_transition_to(Enriching));
        assert!(!Complete.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(Scanning));
        assert!(!Enriching.can_transition_to(Scanning));
    }

    #[test]
    fn test_terminal_and_active() {
        assert!(CoordinateState::Complete.is_terminal());
        assert!(!CoordinateState::Pending.is_terminal());
        assert!(CoordinateState::Scanning.is_active());
        assert!(CoordinateState::Enriching.is_active());
        assert!(!CoordinateState::Pending.is_active());
        assert_eq!(CoordinateState::Enriching.to_string(), "enriching");
    }
}
