//! Coordinate frontier: which (partition, page) to scan next
//!
//! Fresh pages come from per-partition cursors in configured partition order.
//! Transiently failed scans go into a retry heap keyed by the earliest time they
//! may run again, ahead of fresh pages once due.

use crate::config::PartitionEntry;
use crate::state::{PartitionState, WorkCoordinate};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// A coordinate waiting to be re-scanned
#[derive(Debug, Clone)]
pub struct QueuedCoordinate {
    pub coordinate: WorkCoordinate,

    /// Earliest time the retry may be dispatched
    pub not_before: Instant,

    /// Scan attempts already spent in this run
    pub attempts: u32,
}

// Earliest `not_before` is popped first from the max-heap
impl Ord for QueuedCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.coordinate.page.cmp(&self.coordinate.page))
            .then_with(|| other.coordinate.partition.cmp(&self.coordinate.partition))
    }
}

impl PartialOrd for QueuedCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.not_before == other.not_before && self.coordinate == other.coordinate
    }
}

impl Eq for QueuedCoordinate {}

/// A coordinate handed out for scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub coordinate: WorkCoordinate,
    /// Scan attempts already spent on this coordinate in this run
    pub attempts: u32,
}

pub struct Frontier {
    partitions: Vec<PartitionState>,
    retries: BinaryHeap<QueuedCoordinate>,
}

impl Frontier {
    pub fn new(entries: &[PartitionEntry]) -> Self {
        Self {
            partitions: entries.iter().map(PartitionState::from_entry).collect(),
            retries: BinaryHeap::new(),
        }
    }

    /// Next coordinate that may be scanned at `now`
    ///
    /// Due retries come first, then fresh pages from the first partition that
    /// still has any. Coordinates for which `is_complete` holds are skipped.
    pub fn next(
        &mut self,
        now: Instant,
        is_complete: impl Fn(&WorkCoordinate) -> bool,
    ) -> Option<Dispatch> {
        while let Some(top) = self.retries.peek() {
            if top.not_before > now {
                break;
            }
            let Some(queued) = self.retries.pop() else {
                break;
            };
            if is_complete(&queued.coordinate) || !self.accepts(&queued.coordinate) {
                continue;
            }
            return Some(Dispatch {
                coordinate: queued.coordinate,
                attempts: queued.attempts,
            });
        }

        for partition in &mut self.partitions {
            while let Some(page) = partition.advance() {
                let coordinate = WorkCoordinate::new(partition.name.clone(), page);
                if !is_complete(&coordinate) {
                    return Some(Dispatch {
                        coordinate,
                        attempts: 0,
                    });
                }
            }
        }
        None
    }

    /// Schedules a re-scan no earlier than `not_before`
    pub fn retry(&mut self, coordinate: WorkCoordinate, attempts: u32, not_before: Instant) {
        self.retries.push(QueuedCoordinate {
            coordinate,
            not_before,
            attempts,
        });
    }

    /// Records that `coordinate` showed the end-of-partition sentinel
    pub fn mark_end(&mut self, coordinate: &WorkCoordinate) {
        if let Some(partition) = self.partition_mut(&coordinate.partition) {
            partition.mark_end(coordinate.page);
        }
    }

    /// Returns true if the coordinate is still inside its partition's live range
    pub fn accepts(&self, coordinate: &WorkCoordinate) -> bool {
        self.partitions
            .iter()
            .find(|p| p.name == coordinate.partition)
            .map_or(false, |p| p.accepts(coordinate.page))
    }

    /// When the earliest pending retry becomes due, if any
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retries.peek().map(|q| q.not_before)
    }

    /// True when neither fresh pages nor retries remain
    pub fn is_drained(&self) -> bool {
        self.retries.is_empty() && self.partitions.iter().all(|p| p.is_exhausted())
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Partitions that hit the end-of-partition sentinel
    pub fn ended_partitions(&self) -> Vec<&str> {
        self.partitions
            .iter()
            .filter(|p| p.has_ended())
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn partitions(&self) -> &[PartitionState] {
        &self.partitions
    }

    fn partition_mut(&mut self, name: &str) -> Option<&mut PartitionState> {
        self.partitions.iter_mut().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn entries() -> Vec<PartitionEntry> {
        vec![
            PartitionEntry::new("A", 1, Some(3)),
            PartitionEntry::new("B", 1, Some(2)),
        ]
    }

    fn drain(frontier: &mut Frontier, done: &HashSet<WorkCoordinate>) -> Vec<String> {
        let now = Instant::now();
        std::iter::from_fn(|| frontier.next(now, |c| done.contains(c)))
            .map(|d| d.coordinate.to_string())
            .collect()
    }

    #[test]
    fn test_partition_order_then_pages() {
        let mut frontier = Frontier::new(&entries());
        let order = drain(&mut frontier, &HashSet::new());
        assert_eq!(order, vec!["A-1", "A-2", "A-3", "B-1", "B-2"]);
        assert!(frontier.is_drained());
    }

    #[test]
    fn test_skips_completed() {
        let done: HashSet<_> = [WorkCoordinate::new("A", 1), WorkCoordinate::new("B", 2)]
            .into_iter()
            .collect();
        let mut frontier = Frontier::new(&entries());
        assert_eq!(drain(&mut frontier, &done), vec!["A-2", "A-3", "B-1"]);
    }

    #[test]
    fn test_end_stops_partition() {
        let mut frontier = Frontier::new(&[
            PartitionEntry::new("A", 1, None),
            PartitionEntry::new("B", 1, Some(1)),
        ]);
        let now = Instant::now();
        let never = |_: &WorkCoordinate| false;

        assert_eq!(frontier.next(now, never).unwrap().coordinate.to_string(), "A-1");
        assert_eq!(frontier.next(now, never).unwrap().coordinate.to_string(), "A-2");
        frontier.mark_end(&WorkCoordinate::new("A", 2));

        assert_eq!(frontier.next(now, never).unwrap().coordinate.to_string(), "B-1");
        assert!(frontier.next(now, never).is_none());
        assert_eq!(frontier.ended_partitions(), vec!["A"]);
    }

    #[test]
    fn test_retry_waits_until_due() {
        let mut frontier = Frontier::new(&[PartitionEntry::new("A", 1, Some(1))]);
        let now = Instant::now();
        let never = |_: &WorkCoordinate| false;

        let first = frontier.next(now, never).unwrap();
        frontier.retry(first.coordinate.clone(), 1, now + Duration::from_secs(5));

        assert!(frontier.next(now, never).is_none());
        assert!(!frontier.is_drained());
        assert_eq!(frontier.next_retry_at(), Some(now + Duration::from_secs(5)));

        let retried = frontier.next(now + Duration::from_secs(5), never).unwrap();
        assert_eq!(retried.coordinate, first.coordinate);
        assert_eq!(retried.attempts, 1);
        assert!(frontier.is_drained());
    }

    #[test]
    fn test_retry_heap_orders_by_due_time() {
        let mut frontier = Frontier::new(&[PartitionEntry::new("A", 1, Some(0))]);
        let now = Instant::now();
        frontier.retry(WorkCoordinate::new("A", 9), 1, now + Duration::from_secs(9));
        frontier.retry(WorkCoordinate::new("A", 1), 1, now + Duration::from_secs(1));
        assert_eq!(frontier.next_retry_at(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_retry_past_end_is_dropped() {
        let mut frontier = Frontier::new(&[PartitionEntry::new("A", 1, None)]);
        let now = Instant::now();
        frontier.retry(WorkCoordinate::new("A", 5), 1, now);
        frontier.mark_end(&WorkCoordinate::new("A", 3));

        let next = frontier.next(now, |_| false).unwrap();
        assert_eq!(next.coordinate.to_string(), "A-1");
    }
}
