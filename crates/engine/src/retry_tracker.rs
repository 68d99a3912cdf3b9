// SPDX-License-Identifier: Apache-2.0

//! The retry tracker: a bounded, FIFO-evicting `messageId -> count` map
//! consulted by the indexer pattern to decide retry-versus-DLQ.

use std::collections::{HashMap, VecDeque};

/// Snapshot of the retry tracker's metrics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RetryTrackerMetrics {
    /// Number of distinct identities currently tracked.
    pub tracked_messages: u64,
    /// Cumulative retry attempts observed across all identities.
    pub total_retries: u64,
    /// Cumulative entries evicted to stay within `max_keys`.
    pub total_evictions: u64,
    /// Cumulative identities handed off to a dead-letter queue.
    pub dlq_moved_count: u64,
    /// `tracked_messages / max_keys * 100`.
    pub capacity_utilization_percent: f64,
}

/// A bounded map from an identity string (typically a batch identity,
/// `"{run_id}:{min_tick}-{max_tick}"`) to a retry count, with FIFO eviction
/// of the oldest entry when insertion would exceed `max_keys`.
///
/// `reset` and `mark_moved_to_dlq` both actively remove the key rather than
/// relying on eviction to clean up; the insertion-order queue may still
/// hold a stale reference to a key removed this way; eviction and lookups
/// skip queue entries that are no longer present in the map, so each queue
/// entry is visited at most once over its lifetime (amortized O(1)).
pub struct RetryTracker {
    counts: HashMap<String, u32>,
    order: VecDeque<String>,
    max_keys: usize,
    total_retries: u64,
    total_evictions: u64,
    dlq_moved_count: u64,
}

impl RetryTracker {
    /// Creates a tracker that holds at most `max_keys` identities at once.
    #[must_use]
    pub fn new(max_keys: usize) -> Self {
        Self {
            counts: HashMap::new(),
            order: VecDeque::new(),
            max_keys: max_keys.max(1),
            total_retries: 0,
            total_evictions: 0,
            dlq_moved_count: 0,
        }
    }

    /// Increments the retry count for `id`, returning the new count. The
    /// first observation of an identity returns `1`. If adding a new key
    /// would exceed `max_keys`, evicts the oldest tracked entry first.
    pub fn increment_and_get(&mut self, id: &str) -> u32 {
        if let Some(count) = self.counts.get_mut(id) {
            *count += 1;
            self.total_retries += 1;
            return *count;
        }

        if self.counts.len() >= self.max_keys {
            self.evict_oldest();
        }

        self.counts.insert(id.to_owned(), 1);
        self.order.push_back(id.to_owned());
        self.total_retries += 1;
        1
    }

    fn evict_oldest(&mut self) {
        while let Some(oldest) = self.order.pop_front() {
            if self.counts.remove(&oldest).is_some() {
                self.total_evictions += 1;
                return;
            }
        }
    }

    /// Returns the current retry count for `id`, or `0` if untracked.
    #[must_use]
    pub fn get(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Actively removes `id`, e.g. after a successful write.
    pub fn reset(&mut self, id: &str) {
        let _ = self.counts.remove(id);
    }

    /// Actively removes `id` and records it as handed off to a
    /// dead-letter queue.
    pub fn mark_moved_to_dlq(&mut self, id: &str) {
        if self.counts.remove(id).is_some() {
            self.dlq_moved_count += 1;
        }
    }

    /// A snapshot of this tracker's metrics.
    #[must_use]
    pub fn metrics(&self) -> RetryTrackerMetrics {
        let tracked = self.counts.len() as u64;
        RetryTrackerMetrics {
            tracked_messages: tracked,
            total_retries: self.total_retries,
            total_evictions: self.total_evictions,
            dlq_moved_count: self.dlq_moved_count,
            capacity_utilization_percent: tracked as f64 / self.max_keys as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_returns_one() {
        let mut tracker = RetryTracker::new(10);
        assert_eq!(tracker.increment_and_get("run:1-10"), 1);
        assert_eq!(tracker.increment_and_get("run:1-10"), 2);
        assert_eq!(tracker.get("run:1-10"), 2);
        assert_eq!(tracker.get("unknown"), 0);
    }

    #[test]
    fn reset_and_dlq_remove_the_key() {
        let mut tracker = RetryTracker::new(10);
        let _ = tracker.increment_and_get("a");
        tracker.reset("a");
        assert_eq!(tracker.get("a"), 0);

        let _ = tracker.increment_and_get("b");
        tracker.mark_moved_to_dlq("b");
        assert_eq!(tracker.get("b"), 0);
        assert_eq!(tracker.metrics().dlq_moved_count, 1);
    }

    #[test]
    fn exceeding_max_keys_evicts_oldest_insertion() {
        let mut tracker = RetryTracker::new(2);
        let _ = tracker.increment_and_get("a");
        let _ = tracker.increment_and_get("b");
        let _ = tracker.increment_and_get("c");

        assert_eq!(tracker.get("a"), 0, "oldest entry must be evicted");
        assert_eq!(tracker.get("b"), 1);
        assert_eq!(tracker.get("c"), 1);
        assert_eq!(tracker.metrics().total_evictions, 1);
        assert_eq!(tracker.metrics().tracked_messages, 2);
    }

    #[test]
    fn capacity_utilization_reflects_occupancy() {
        let mut tracker = RetryTracker::new(4);
        let _ = tracker.increment_and_get("a");
        let _ = tracker.increment_and_get("b");
        assert!((tracker.metrics().capacity_utilization_percent - 50.0).abs() < f64::EPSILON);
    }
}
