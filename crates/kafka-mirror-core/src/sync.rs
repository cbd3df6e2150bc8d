//! Offset sync points and the translation store.
//!
//! The replicator records, per source partition, a sparse series of
//! (source offset → downstream offset) sync points. Because replication is
//! record-for-record within a produced batch, any source offset at or past a
//! sync point translates by simple displacement from the nearest sync point
//! at or below it. The store answers those queries for the checkpoint
//! emitter.
//!
//! Concurrency: one writer (the partition's replicator task) appends via
//! [`OffsetSyncStore::record_sync`]; readers see an immutable `Arc` snapshot
//! per partition swapped in atomically, so no lock is held across a
//! translation.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::broker::TopicPartition;

/// Retained sync points per partition.
///
/// The window tolerates duplicate and out-of-order delivery from the
/// at-least-once offset-syncs stream while keeping rebuilds bounded.
pub const SYNC_WINDOW: usize = 64;

/// One (source offset → downstream offset) correlation for a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetSync {
    pub topic: String,
    pub partition: i32,
    pub source_offset: i64,
    pub downstream_offset: i64,
}

impl OffsetSync {
    #[must_use]
    pub fn new(tp: &TopicPartition, source_offset: i64, downstream_offset: i64) -> Self {
        Self {
            topic: tp.topic.clone(),
            partition: tp.partition,
            source_offset,
            downstream_offset,
        }
    }

    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Per-pair translation store over sparse sync points.
///
/// Scoped to one (source, target) replication direction; never shared across
/// pairs.
#[derive(Debug, Default)]
pub struct OffsetSyncStore {
    syncs: DashMap<TopicPartition, Arc<Vec<OffsetSync>>>,
}

impl OffsetSyncStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new sync point for a partition.
    ///
    /// Points arriving with a source offset at or below the newest retained
    /// point are duplicates or stale reorderings from the at-least-once
    /// stream and are dropped, which keeps the retained series strictly
    /// increasing. Returns whether the point was retained.
    pub fn record_sync(&self, sync: OffsetSync) -> bool {
        let tp = sync.topic_partition();
        let mut entry = self.syncs.entry(tp).or_insert_with(|| Arc::new(Vec::new()));

        if let Some(newest) = entry.value().last() {
            if sync.source_offset <= newest.source_offset {
                return false;
            }
        }

        // Copy-on-write: readers keep whatever snapshot they already cloned.
        let mut window: Vec<OffsetSync> = entry.value().as_ref().clone();
        window.push(sync);
        if window.len() > SYNC_WINDOW {
            let excess = window.len() - SYNC_WINDOW;
            window.drain(..excess);
        }
        *entry.value_mut() = Arc::new(window);
        true
    }

    /// Rebuild the store from an offset-syncs stream read at startup.
    pub fn load(&self, syncs: impl IntoIterator<Item = OffsetSync>) {
        for sync in syncs {
            self.record_sync(sync);
        }
    }

    /// Translate a source offset into its downstream counterpart.
    ///
    /// Uses the most recent sync point whose source offset is at or below
    /// the query and displaces by the distance from it. `None` means the
    /// offset has not been mirrored yet: a coverage gap, not an error.
    #[must_use]
    pub fn translate(&self, tp: &TopicPartition, source_offset: i64) -> Option<i64> {
        let snapshot = self.snapshot(tp)?;
        let idx = snapshot.partition_point(|s| s.source_offset <= source_offset);
        if idx == 0 {
            return None;
        }
        let sync = &snapshot[idx - 1];
        Some(sync.downstream_offset + (source_offset - sync.source_offset))
    }

    /// Newest retained sync point for a partition.
    #[must_use]
    pub fn latest_sync(&self, tp: &TopicPartition) -> Option<OffsetSync> {
        self.snapshot(tp).and_then(|s| s.last().cloned())
    }

    /// Source offset to resume replication at after a restart, given the
    /// target partition's current log-end offset.
    ///
    /// The newest sync point anchors the correspondence; records produced
    /// downstream past it shift the resume point forward by the same count.
    /// With no sync points the partition restarts from the beginning.
    #[must_use]
    pub fn resume_offset(&self, tp: &TopicPartition, target_end_offset: i64) -> i64 {
        match self.latest_sync(tp) {
            Some(sync) => sync.source_offset + (target_end_offset - sync.downstream_offset),
            None => 0,
        }
    }

    /// Immutable snapshot of a partition's retained sync points.
    #[must_use]
    pub fn snapshot(&self, tp: &TopicPartition) -> Option<Arc<Vec<OffsetSync>>> {
        self.syncs.get(tp).map(|e| Arc::clone(e.value()))
    }

    /// Partitions with at least one retained sync point.
    #[must_use]
    pub fn tracked_partitions(&self) -> Vec<TopicPartition> {
        self.syncs.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp() -> TopicPartition {
        TopicPartition::new("orders", 0)
    }

    fn store_with(points: &[(i64, i64)]) -> OffsetSyncStore {
        let store = OffsetSyncStore::new();
        for &(src, down) in points {
            assert!(store.record_sync(OffsetSync::new(&tp(), src, down)));
        }
        store
    }

    #[test]
    fn exact_match_returns_the_paired_downstream_offset() {
        let store = store_with(&[(100, 40), (200, 140)]);
        assert_eq!(store.translate(&tp(), 100), Some(40));
        assert_eq!(store.translate(&tp(), 200), Some(140));
    }

    #[test]
    fn translation_displaces_from_the_nearest_lower_sync() {
        let store = store_with(&[(100, 40), (200, 140)]);
        assert_eq!(store.translate(&tp(), 150), Some(90));
        assert_eq!(store.translate(&tp(), 101), Some(41));
        // Past the newest point the displacement continues.
        assert_eq!(store.translate(&tp(), 205), Some(145));
    }

    #[test]
    fn below_the_earliest_sync_is_unknown() {
        let store = store_with(&[(100, 40)]);
        assert_eq!(store.translate(&tp(), 99), None);
        assert_eq!(store.translate(&tp(), 0), None);
    }

    #[test]
    fn unknown_partition_is_unknown() {
        let store = store_with(&[(100, 40)]);
        let other = TopicPartition::new("payments", 0);
        assert_eq!(store.translate(&other, 100), None);
    }

    #[test]
    fn duplicate_and_stale_syncs_are_dropped() {
        let store = store_with(&[(100, 40), (200, 140)]);
        // Redelivery of an old point.
        assert!(!store.record_sync(OffsetSync::new(&tp(), 100, 40)));
        // Reordered delivery with equal source offset.
        assert!(!store.record_sync(OffsetSync::new(&tp(), 200, 141)));
        // Out-of-order older point.
        assert!(!store.record_sync(OffsetSync::new(&tp(), 150, 90)));

        let snapshot = store.snapshot(&tp()).unwrap();
        assert_eq!(snapshot.len(), 2);
        let sources: Vec<i64> = snapshot.iter().map(|s| s.source_offset).collect();
        assert_eq!(sources, vec![100, 200]);
    }

    #[test]
    fn retained_series_is_strictly_increasing() {
        let store = OffsetSyncStore::new();
        for i in 0..200 {
            // Writer emits monotonically; interleave some duplicates.
            store.record_sync(OffsetSync::new(&tp(), i * 10, i * 10 + 5));
            store.record_sync(OffsetSync::new(&tp(), i * 10, i * 10 + 5));
        }
        let snapshot = store.snapshot(&tp()).unwrap();
        for pair in snapshot.windows(2) {
            assert!(pair[0].source_offset < pair[1].source_offset);
        }
    }

    #[test]
    fn window_evicts_the_oldest_points() {
        let store = OffsetSyncStore::new();
        let total = SYNC_WINDOW as i64 + 16;
        for i in 0..total {
            store.record_sync(OffsetSync::new(&tp(), i * 100, i * 100));
        }
        let snapshot = store.snapshot(&tp()).unwrap();
        assert_eq!(snapshot.len(), SYNC_WINDOW);
        // Offsets below the evicted boundary are unknown again.
        assert_eq!(store.translate(&tp(), 0), None);
        let earliest = snapshot.first().unwrap().source_offset;
        assert_eq!(store.translate(&tp(), earliest), Some(earliest));
    }

    #[test]
    fn snapshots_are_stable_across_later_writes() {
        let store = store_with(&[(100, 40)]);
        let snapshot = store.snapshot(&tp()).unwrap();
        store.record_sync(OffsetSync::new(&tp(), 200, 140));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.snapshot(&tp()).unwrap().len(), 2);
    }

    #[test]
    fn load_rebuilds_from_a_stream_with_duplicates() {
        let store = OffsetSyncStore::new();
        store.load(vec![
            OffsetSync::new(&tp(), 100, 40),
            OffsetSync::new(&tp(), 100, 40),
            OffsetSync::new(&tp(), 300, 240),
            OffsetSync::new(&tp(), 200, 140),
        ]);
        let snapshot = store.snapshot(&tp()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.translate(&tp(), 300), Some(240));
        assert_eq!(store.translate(&tp(), 250), Some(190));
    }

    #[test]
    fn resume_offset_continues_the_correspondence() {
        let store = store_with(&[(100, 40)]);
        // Target log grew to 45 since the sync: five more records mirrored.
        assert_eq!(store.resume_offset(&tp(), 45), 105);
        // Fresh partition restarts from zero.
        let other = TopicPartition::new("payments", 3);
        assert_eq!(store.resume_offset(&other, 0), 0);
    }

    #[test]
    fn sync_record_round_trips_through_json() {
        let sync = OffsetSync::new(&tp(), 128, 64);
        let bytes = serde_json::to_vec(&sync).unwrap();
        let back: OffsetSync = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, sync);
    }
}
