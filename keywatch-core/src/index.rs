use std::collections::BTreeMap;

use tokio::time::Instant;

/// Position of an entry in the expiration order.
///
/// A deadline alone cannot key the index because two entries may expire at
/// the same instant. The insertion sequence number breaks the tie, so every
/// stamp is unique and entries sharing a deadline keep their insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ExpiryStamp {
    pub(crate) deadline: Instant,
    pub(crate) seq: u64,
}

/// Ordered mapping from expiry stamp to key.
///
/// The first entry is always the next one to expire, so finding the
/// scheduler's wait target and removing a specific stamp are both O(log n).
#[derive(Debug)]
pub(crate) struct ExpirationIndex<K> {
    map: BTreeMap<ExpiryStamp, K>,
}

impl<K> ExpirationIndex<K> {
    pub(crate) fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, stamp: ExpiryStamp, key: K) {
        self.map.insert(stamp, key);
    }

    pub(crate) fn remove(&mut self, stamp: &ExpiryStamp) -> Option<K> {
        self.map.remove(stamp)
    }

    /// Returns the stamp of the next entry to expire, if any.
    pub(crate) fn peek_first(&self) -> Option<ExpiryStamp> {
        self.map.first_key_value().map(|(stamp, _)| *stamp)
    }

    /// Removes and returns the earliest entry if its deadline has passed.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(ExpiryStamp, K)> {
        let first = self.peek_first()?;
        if first.deadline > now {
            return None;
        }
        self.map.pop_first()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stamp(deadline: Instant, seq: u64) -> ExpiryStamp {
        ExpiryStamp { deadline, seq }
    }

    #[test]
    fn test_orders_by_deadline() {
        let now = Instant::now();
        let mut index = ExpirationIndex::new();

        index.insert(stamp(now + Duration::from_secs(30), 0), "late");
        index.insert(stamp(now + Duration::from_secs(10), 1), "early");

        let first = index.peek_first().unwrap();
        assert_eq!(first.deadline, now + Duration::from_secs(10));
    }

    #[test]
    fn test_equal_deadlines_keep_insertion_order() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut index = ExpirationIndex::new();

        index.insert(stamp(deadline, 0), "first");
        index.insert(stamp(deadline, 1), "second");
        assert_eq!(index.len(), 2);

        let far_future = deadline + Duration::from_secs(1);
        let (_, key) = index.pop_due(far_future).unwrap();
        assert_eq!(key, "first");
        let (_, key) = index.pop_due(far_future).unwrap();
        assert_eq!(key, "second");
        assert!(index.is_empty());
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let now = Instant::now();
        let mut index = ExpirationIndex::new();
        index.insert(stamp(now + Duration::from_secs(10), 0), "pending");

        assert!(index.pop_due(now).is_none());
        assert_eq!(index.len(), 1);

        assert!(index.pop_due(now + Duration::from_secs(10)).is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_specific_stamp() {
        let now = Instant::now();
        let early = stamp(now + Duration::from_secs(1), 0);
        let late = stamp(now + Duration::from_secs(2), 1);

        let mut index = ExpirationIndex::new();
        index.insert(early, "early");
        index.insert(late, "late");

        assert_eq!(index.remove(&early), Some("early"));
        assert_eq!(index.peek_first(), Some(late));
        assert_eq!(index.remove(&early), None);
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut index = ExpirationIndex::new();
        index.insert(stamp(now + Duration::from_secs(1), 0), "a");
        index.insert(stamp(now + Duration::from_secs(2), 1), "b");

        index.clear();
        assert!(index.is_empty());
        assert!(index.peek_first().is_none());
    }
}
