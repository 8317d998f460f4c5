use crate::config::PartitionEntry;

/// Tracks how far the crawl has advanced through one partition
///
/// Pages are handed out in order from `next_page`. A partition stops producing
/// pages once its configured last page is reached or an end-of-partition page
/// has been observed.
#[derive(Debug, Clone)]
pub struct PartitionState {
    pub name: String,

    /// Next page to hand out
    pub next_page: u32,

    /// Configured upper bound, if any
    pub last_page: Option<u32>,

    /// First page that reported the no-results sentinel
    pub ended_at: Option<u32>,

    /// Pages handed out during this run
    pub pages_dispatched: u32,
}

impl PartitionState {
    pub fn from_entry(entry: &PartitionEntry) -> Self {
        Self {
            name: entry.name.clone(),
            next_page: entry.first_page,
            last_page: entry.last_page,
            ended_at: None,
            pages_dispatched: 0,
        }
    }

    /// Returns true if no more pages should be handed out
    pub fn is_exhausted(&self) -> bool {
        !self.accepts(self.next_page)
    }

    /// Returns true if `page` is still inside the partition's live range
    pub fn accepts(&self, page: u32) -> bool {
        let within_bound = self.last_page.map_or(true, |last| page <= last);
        let before_end = self.ended_at.map_or(true, |end| page < end);
        within_bound && before_end
    }

    /// Hands out the next page, or None when exhausted
    pub fn advance(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }

        let page = self.next_page;
        self.next_page += 1;
        self.pages_dispatched += 1;
        Some(page)
    }

    /// Records an end-of-partition page
    ///
    /// Pages at or after the earliest end page are no longer handed out.
    pub fn mark_end(&mut self, page: u32) {
        self.ended_at = Some(self.ended_at.map_or(page, |end| end.min(page)));
    }

    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_partition() {
        let mut state = PartitionState::from_entry(&PartitionEntry::new("A", 1, Some(2)));

        assert_eq!(state.advance(), Some(1));
        assert_eq!(state.advance(), Some(2));
        assert_eq!(state.advance(), None);
        assert!(state.is_exhausted());
        assert_eq!(state.pages_dispatched, 2);
    }

    #[test]
    fn test_custom_first_page() {
        let mut state = PartitionState::from_entry(&PartitionEntry::new("A", 5, Some(6)));
        assert_eq!(state.advance(), Some(5));
        assert_eq!(state.advance(), Some(6));
        assert_eq!(state.advance(), None);
    }

    #[test]
    fn test_end_marker_stops_partition() {
        let mut state = PartitionState::from_entry(&PartitionEntry::new("A", 1, None));
        assert_eq!(state.advance(), Some(1));
        assert_eq!(state.advance(), Some(2));
        assert_eq!(state.advance(), Some(3));

        state.mark_end(2);
        assert!(state.has_ended());
        assert!(state.accepts(1));
        assert!(!state.accepts(2));
        assert!(!state.accepts(3));
        assert_eq!(state.advance(), None);
    }

    #[test]
    fn test_earliest_end_wins() {
        let mut state = PartitionState::from_entry(&PartitionEntry::new("A", 1, None));
        state.mark_end(5);
        state.mark_end(3);
        state.mark_end(4);
        assert_eq!(state.ended_at, Some(3));
    }
}
