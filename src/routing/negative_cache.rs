//! Recently failed lookups.

use std::collections::{HashMap, VecDeque};

/// Bounded least-recently-used set of URLs that matched no unit.
///
/// Capacity only grows; setting it to zero disables the cache and drops
/// its entries.
///
/// Recency is tracked with stamps: `entries` maps each URL to its latest
/// stamp, and `order` queues `(stamp, url)` pairs oldest first. A hit
/// pushes a fresh pair and leaves the old one behind; pairs whose stamp no
/// longer matches are discarded when they reach the front or when the
/// queue is compacted.
#[derive(Debug, Default)]
pub struct NegativeCache {
    capacity: usize,
    next_stamp: u64,
    order: VecDeque<(u64, String)>,
    entries: HashMap<String, u64>,
}

impl NegativeCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a newly computed target capacity. Smaller non-zero targets
    /// are ignored.
    pub fn resize(&mut self, target: usize) {
        if target == 0 {
            self.capacity = 0;
            self.clear();
        } else if target > self.capacity {
            self.capacity = target;
        }
    }

    /// True if `url` is cached; a hit refreshes its recency.
    pub fn contains(&mut self, url: &str) -> bool {
        let stamp = self.next_stamp;
        let Some(current) = self.entries.get_mut(url) else {
            return false;
        };
        *current = stamp;
        self.next_stamp += 1;
        self.order.push_back((stamp, url.to_string()));
        self.compact();
        true
    }

    pub fn insert(&mut self, url: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let url = url.into();
        if self.contains(&url) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some((stamp, oldest)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&oldest) == Some(&stamp) {
                self.entries.remove(&oldest);
            }
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.entries.insert(url.clone(), stamp);
        self.order.push_back((stamp, url));
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Drops superseded pairs once they outnumber live entries.
    fn compact(&mut self) {
        if self.order.len() <= 2 * self.entries.len().max(8) {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(stamp, url)| entries.get(url) == Some(stamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recent() {
        let mut cache = NegativeCache::new(2);
        cache.insert("a");
        cache.insert("b");
        assert!(cache.contains("a"));
        cache.insert("c");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_capacity_only_grows() {
        let mut cache = NegativeCache::new(10);
        cache.resize(5);
        assert_eq!(cache.capacity(), 10);
        cache.resize(20);
        assert_eq!(cache.capacity(), 20);
    }

    #[test]
    fn test_zero_disables() {
        let mut cache = NegativeCache::new(10);
        cache.insert("a");
        cache.resize(0);
        assert!(cache.is_empty());
        cache.insert("b");
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_repeated_hits_keep_queue_bounded() {
        let mut cache = NegativeCache::new(4);
        for url in ["a", "b", "c", "d"] {
            cache.insert(url);
        }
        for _ in 0..1000 {
            assert!(cache.contains("a"));
        }
        assert!(cache.order.len() <= 2 * 8 + 1);

        // "a" is the most recent, so "b" is evicted first
        cache.insert("e");
        assert_eq!(cache.len(), 4);
        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("e"));
    }
}
