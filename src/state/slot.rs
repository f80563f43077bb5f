use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::granularity::Granularity;
use crate::telemetry::TrackerMetrics;

use super::stamp::{StampSnapshot, StampState, UpdateStamp};
use super::SlotState;

/// Slot state for a single (shard, granularity) pair.
///
/// Metrics flow in from multiple ingestor nodes with no ordering
/// guarantee, so every ingested sample stamps its slot with its own
/// collection time. That state is persisted by the host's pusher and read
/// back on every node; [`SlotStateManager::update_slot_on_read`] merges the
/// persisted view so that, once all nodes have seen the same set of active
/// timestamps for a slot, they all settle on the maximum and the first
/// completed rollup moves everyone to Rolled together.
pub struct SlotStateManager {
    shard: u32,
    granularity: Granularity,
    slots: DashMap<u32, UpdateStamp>,
    metrics: Arc<TrackerMetrics>,
}

impl SlotStateManager {
    /// Creates an empty manager sized for the granularity's slot ring.
    pub fn new(shard: u32, granularity: Granularity, metrics: Arc<TrackerMetrics>) -> Self {
        Self {
            shard,
            granularity,
            slots: DashMap::with_capacity(granularity.num_slots() as usize),
            metrics,
        }
    }

    /// The granularity this manager tracks.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Merges one slot's persisted state into the in-memory view.
    ///
    /// An incoming Active stamp with a different timestamp wins unless we
    /// are Active with a newer timestamp or still hold an unpersisted
    /// (dirty) view; in that case our stamp is re-marked dirty so the next
    /// flush re-publishes it and peers converge upward instead of us
    /// converging down. On a timestamp tie an incoming Rolled stamp wins:
    /// a peer rolled exactly what we hold.
    pub fn update_slot_on_read(&self, slot_state: &SlotState) {
        let slot = slot_state.slot;
        let timestamp = slot_state.timestamp;
        let state = slot_state.state;

        let Some(stamp) = self.slots.get(&slot) else {
            // First sight of this slot, typically right after startup.
            self.slots
                .entry(slot)
                .or_insert_with(|| UpdateStamp::new(timestamp, state, false));
            return;
        };

        if stamp.timestamp() != timestamp && state == StampState::Active {
            if stamp.state() == StampState::Active
                && (stamp.timestamp() > timestamp || stamp.is_dirty())
            {
                // Our view is newer than what peers have seen; it must be
                // re-published before this slot can converge.
                stamp.set_dirty(true);
            } else {
                stamp.set_timestamp(timestamp);
                stamp.set_state(StampState::Active);
                stamp.set_dirty(false);
            }
        } else if stamp.timestamp() == timestamp && state == StampState::Rolled {
            stamp.set_state(StampState::Rolled);
        }
    }

    /// Stamps a slot with an ingested sample's collection time.
    ///
    /// Ingest always wins, with no monotonicity check: clock skew between
    /// ingestors is reconciled later by the on-read merge.
    pub fn create_or_update(&self, slot: u32, collected_at_ms: i64) {
        match self.slots.entry(slot) {
            Entry::Occupied(entry) => {
                let stamp = entry.get();
                stamp.set_timestamp(collected_at_ms);
                if stamp.state() == StampState::Rolled {
                    self.metrics.re_rollups.inc();
                    info!(
                        shard = self.shard,
                        slot,
                        granularity = %self.granularity,
                        "re-rolling slot because of new data"
                    );
                }
                stamp.set_state(StampState::Active);
                stamp.set_dirty(true);
            }
            Entry::Vacant(entry) => {
                entry.insert(UpdateStamp::new(collected_at_ms, StampState::Active, true));
            }
        }
        self.metrics.slot_updates.inc();
    }

    /// Drains the dirty set: returns a snapshot of every dirty slot and
    /// clears the flags in place.
    ///
    /// Snapshots are taken before the clear, so the returned stamps read
    /// dirty. A concurrent ingest landing between the copy and the clear
    /// loses its flag; the next ingest of that slot re-dirties it, so
    /// every divergence still reaches a later extraction.
    pub fn dirty_slots_and_mark_clean(&self) -> HashMap<u32, StampSnapshot> {
        let mut dirty = HashMap::new();
        for entry in self.slots.iter() {
            let stamp = entry.value();
            if !stamp.is_dirty() {
                continue;
            }
            dirty.insert(*entry.key(), stamp.snapshot());
            stamp.set_dirty(false);
        }
        dirty
    }

    /// Unconditionally moves a slot to `state`, returning the resulting
    /// stamp. Used by the rollup executor to walk Active -> Running ->
    /// Rolled. Setting state on a never-seen slot is a no-op.
    pub fn set_state(&self, slot: u32, state: StampState) -> Option<StampSnapshot> {
        let stamp = self.slots.get(&slot)?;
        stamp.set_state(state);
        Some(stamp.snapshot())
    }

    /// Point-in-time copy of one slot's stamp.
    pub fn stamp(&self, slot: u32) -> Option<StampSnapshot> {
        self.slots.get(&slot).map(|stamp| stamp.snapshot())
    }

    /// Live view over the slot map. This is not a snapshot: readers
    /// iterating it can observe concurrent updates mid-iteration.
    pub fn slot_stamps(&self) -> &DashMap<u32, UpdateStamp> {
        &self.slots
    }

    /// Slots that are not Rolled and whose stamp is older than
    /// `max_age_ms` at `now_ms`, in unspecified order.
    ///
    /// Side effect: records the elapsed age of every visited slot, rolled
    /// ones included, into the time-since-update histogram.
    pub fn slots_older_than(&self, now_ms: i64, max_age_ms: i64) -> Vec<u32> {
        let mut out = Vec::new();
        for entry in self.slots.iter() {
            let stamp = entry.value();
            let elapsed = now_ms - stamp.timestamp();
            self.metrics.time_since_update_ms.observe(elapsed as f64);
            if stamp.state() == StampState::Rolled {
                continue;
            }
            if elapsed <= max_age_ms {
                continue;
            }
            out.push(*entry.key());
        }
        out
    }

    /// Locator keys of the slot itself and of every finer slot beneath it,
    /// for driving downstream data reads.
    pub fn child_and_self_keys(&self, slot: u32) -> Vec<String> {
        let mut keys = self.granularity.children_keys(slot, self.shard);
        keys.push(self.granularity.locator_key(slot, self.shard));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(granularity: Granularity) -> SlotStateManager {
        let metrics = Arc::new(TrackerMetrics::new().expect("metrics should register"));
        SlotStateManager::new(1, granularity, metrics)
    }

    fn read_state(slot: u32, timestamp: i64, state: StampState) -> SlotState {
        SlotState {
            granularity: Granularity::Min5,
            slot,
            timestamp,
            state,
        }
    }

    #[test]
    fn test_ingest_then_flush() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(42, 1_000);
        mgr.create_or_update(42, 900);

        let dirty = mgr.dirty_slots_and_mark_clean();
        assert_eq!(dirty.len(), 1);
        let snap = dirty[&42];
        // Last write wins even when older.
        assert_eq!(snap.timestamp, 900);
        assert_eq!(snap.state, StampState::Active);
        assert!(snap.dirty);

        // Flag cleared in place; a second drain is empty.
        assert!(!mgr.stamp(42).expect("stamp exists").dirty);
        assert!(mgr.dirty_slots_and_mark_clean().is_empty());
    }

    #[test]
    fn test_ingest_always_ends_active_and_dirty() {
        let mgr = manager(Granularity::Min5);
        for ts in [5_000, 2_000, 9_000, 1] {
            mgr.create_or_update(7, ts);
        }
        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 1);
        assert_eq!(snap.state, StampState::Active);
        assert!(snap.dirty);
    }

    #[test]
    fn test_ingest_reactivates_rolled_slot() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(3, 1_000);
        mgr.set_state(3, StampState::Rolled);

        let before = mgr.metrics.re_rollups.get();
        mgr.create_or_update(3, 2_000);

        let snap = mgr.stamp(3).expect("stamp exists");
        assert_eq!(snap.state, StampState::Active);
        assert!(snap.dirty);
        assert_eq!(mgr.metrics.re_rollups.get(), before + 1.0);
    }

    #[test]
    fn test_ingest_ticks_update_meter() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(1, 10);
        mgr.create_or_update(1, 20);
        mgr.create_or_update(2, 30);
        assert_eq!(mgr.metrics.slot_updates.get(), 3.0);
    }

    #[test]
    fn test_on_read_absent_takes_update_clean() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(7, 500, StampState::Rolled));

        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 500);
        assert_eq!(snap.state, StampState::Rolled);
        assert!(!snap.dirty);
    }

    #[test]
    fn test_on_read_newer_active_wins() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(7, 500, StampState::Active));
        mgr.update_slot_on_read(&read_state(7, 600, StampState::Active));

        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 600);
        assert_eq!(snap.state, StampState::Active);
        assert!(!snap.dirty);

        // An older active loses.
        mgr.update_slot_on_read(&read_state(7, 550, StampState::Active));
        assert_eq!(mgr.stamp(7).expect("stamp exists").timestamp, 600);
    }

    #[test]
    fn test_on_read_dirty_stamp_is_not_overwritten() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(7, 1_000);

        // Even a newer peer timestamp cannot displace an unpersisted view.
        mgr.update_slot_on_read(&read_state(7, 2_000, StampState::Active));

        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 1_000);
        assert_eq!(snap.state, StampState::Active);
        assert!(snap.dirty);
    }

    #[test]
    fn test_on_read_clean_active_overwritten_by_newer_peer() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(7, 1_000);
        mgr.dirty_slots_and_mark_clean();

        mgr.update_slot_on_read(&read_state(7, 2_000, StampState::Active));
        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 2_000);
        assert!(!snap.dirty);
    }

    #[test]
    fn test_on_read_older_peer_remarks_clean_newer_stamp_dirty() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(7, 2_000, StampState::Active));

        // A peer still publishing an older active view: keep ours, but
        // re-dirty it so it gets pushed again.
        mgr.update_slot_on_read(&read_state(7, 1_500, StampState::Active));
        let snap = mgr.stamp(7).expect("stamp exists");
        assert_eq!(snap.timestamp, 2_000);
        assert!(snap.dirty);
    }

    #[test]
    fn test_on_read_remove_wins_on_timestamp_tie() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(9, 1_000, StampState::Active));

        mgr.update_slot_on_read(&read_state(9, 1_000, StampState::Rolled));
        let snap = mgr.stamp(9).expect("stamp exists");
        assert_eq!(snap.state, StampState::Rolled);
        assert_eq!(snap.timestamp, 1_000);
    }

    #[test]
    fn test_on_read_rolled_with_different_timestamp_is_ignored() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(9, 1_000, StampState::Active));

        mgr.update_slot_on_read(&read_state(9, 900, StampState::Rolled));
        let snap = mgr.stamp(9).expect("stamp exists");
        assert_eq!(snap.state, StampState::Active);
        assert_eq!(snap.timestamp, 1_000);
    }

    #[test]
    fn test_on_read_running_stamp_takes_newer_active() {
        let mgr = manager(Granularity::Min5);
        mgr.update_slot_on_read(&read_state(4, 1_000, StampState::Active));
        mgr.set_state(4, StampState::Running);

        mgr.update_slot_on_read(&read_state(4, 3_000, StampState::Active));
        let snap = mgr.stamp(4).expect("stamp exists");
        assert_eq!(snap.state, StampState::Active);
        assert_eq!(snap.timestamp, 3_000);
    }

    #[test]
    fn test_dirty_drain_partitions_the_map() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(1, 100);
        mgr.create_or_update(2, 200);
        mgr.update_slot_on_read(&read_state(3, 300, StampState::Active));

        let dirty = mgr.dirty_slots_and_mark_clean();
        assert_eq!(dirty.len(), 2);
        assert!(dirty.contains_key(&1));
        assert!(dirty.contains_key(&2));

        // No remaining slot is dirty.
        for entry in mgr.slot_stamps().iter() {
            assert!(!entry.value().is_dirty());
        }
    }

    #[test]
    fn test_set_state_on_unknown_slot_is_noop() {
        let mgr = manager(Granularity::Min5);
        assert!(mgr.set_state(99, StampState::Running).is_none());
        assert!(mgr.stamp(99).is_none());
    }

    #[test]
    fn test_slots_older_than_filters_age_and_rolled() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(1, 9_000); // too fresh
        mgr.create_or_update(2, 4_000); // old enough
        mgr.create_or_update(3, 3_000); // old enough but rolled
        mgr.set_state(3, StampState::Rolled);

        let old = mgr.slots_older_than(10_000, 2_000);
        assert_eq!(old, vec![2]);

        // Every slot visited fed the histogram, rolled ones included.
        assert_eq!(mgr.metrics.time_since_update_ms.get_sample_count(), 3);
    }

    #[test]
    fn test_slots_older_than_boundary_is_exclusive() {
        let mgr = manager(Granularity::Min5);
        mgr.create_or_update(1, 8_000);

        // Exactly max_age old does not qualify.
        assert!(mgr.slots_older_than(10_000, 2_000).is_empty());
        assert_eq!(mgr.slots_older_than(10_001, 2_000), vec![1]);
    }

    #[test]
    fn test_child_and_self_keys() {
        let mgr = manager(Granularity::Min20);
        let keys = mgr.child_and_self_keys(3);

        // Four 5m children, four full-resolution children, then self.
        assert_eq!(keys.len(), 9);
        assert_eq!(keys.last().expect("self key"), "metrics_20m,3,1");
        assert!(keys.contains(&"metrics_5m,12,1".to_string()));
        assert!(keys.contains(&"metrics_5m,15,1".to_string()));
        assert!(keys.contains(&"metrics_full,12,1".to_string()));
    }

    #[test]
    fn test_concurrent_ingest_eventual_visibility() {
        use std::thread;

        let mgr = Arc::new(manager(Granularity::Min5));
        let mut handles = Vec::new();

        for t in 0..4i64 {
            let mgr = Arc::clone(&mgr);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    mgr.create_or_update((i % 32) as u32, t * 10_000 + i);
                }
            }));
        }

        for h in handles {
            h.join().expect("thread panicked");
        }

        // All touched slots are active and dirty once ingest quiesces.
        let dirty = mgr.dirty_slots_and_mark_clean();
        assert_eq!(dirty.len(), 32);
        for snap in dirty.values() {
            assert_eq!(snap.state, StampState::Active);
            assert!(snap.dirty);
        }
        assert_eq!(mgr.metrics.slot_updates.get(), 2_000.0);
    }
}
