use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::clock::Clock;
use crate::config::NUM_SHARDS;
use crate::granularity::Granularity;
use crate::telemetry::TrackerMetrics;

use super::slot::SlotStateManager;
use super::stamp::{StampSnapshot, StampState, UpdateStamp};
use super::SlotState;

/// Slot managers for one shard, indexed by rollup granularity position.
struct ShardGranularities {
    slots: [SlotStateManager; 5],
}

impl ShardGranularities {
    fn new(shard: u32, metrics: &Arc<TrackerMetrics>) -> Self {
        Self {
            slots: std::array::from_fn(|i| {
                SlotStateManager::new(
                    shard,
                    Granularity::rollup_granularities()[i],
                    Arc::clone(metrics),
                )
            }),
        }
    }
}

/// Tracks rollup state for every shard in the universe and the subset of
/// shards this process schedules rollups for.
///
/// The universe map is immutable after construction and holds state for
/// unmanaged shards too: peers publish updates for shards this process only
/// observes, and that state must land somewhere. Membership in the managed
/// set gates scheduling only, never state ingestion.
pub struct ShardStateManager {
    managed: RwLock<HashSet<u32>>,
    // One entry per shard in the universe, not just the managed set.
    states: Vec<ShardGranularities>,
    clock: Arc<dyn Clock>,
    metrics: Arc<TrackerMetrics>,
}

impl ShardStateManager {
    /// Creates a manager over the whole shard universe, initially managing
    /// `shards`.
    pub fn new(shards: &[u32], clock: Arc<dyn Clock>, metrics: Arc<TrackerMetrics>) -> Self {
        Self {
            managed: RwLock::new(shards.iter().copied().collect()),
            states: (0..NUM_SHARDS)
                .map(|shard| ShardGranularities::new(shard, &metrics))
                .collect(),
            clock,
            metrics,
        }
    }

    /// Whether this process manages `shard`. Always false while the
    /// managed set is empty, which distinguishes an uninitialized manager
    /// from a populated one.
    pub fn contains(&self, shard: u32) -> bool {
        let managed = self.managed.read();
        !managed.is_empty() && managed.contains(&shard)
    }

    /// Starts managing a shard.
    pub fn add(&self, shard: u32) {
        self.managed.write().insert(shard);
    }

    /// Stops managing a shard. Its state keeps ingesting peer updates.
    pub fn remove(&self, shard: u32) {
        self.managed.write().remove(&shard);
    }

    /// The shards this process currently schedules rollups for.
    pub fn managed_shards(&self) -> Vec<u32> {
        self.managed.read().iter().copied().collect()
    }

    /// The slot manager for a (shard, granularity) pair.
    ///
    /// # Panics
    ///
    /// Panics if `shard` is outside the universe or `granularity` is full
    /// resolution, which has no rollup slot state.
    pub fn slot_state_manager(&self, shard: u32, granularity: Granularity) -> &SlotStateManager {
        assert!(
            granularity != Granularity::Full,
            "full resolution has no rollup slot state"
        );
        &self.states[shard as usize].slots[granularity.index() - 1]
    }

    /// Point-in-time copy of one slot's stamp.
    pub fn update_stamp(
        &self,
        shard: u32,
        granularity: Granularity,
        slot: u32,
    ) -> Option<StampSnapshot> {
        self.slot_state_manager(shard, granularity).stamp(slot)
    }

    /// Drains the dirty slots of every rollup granularity for a shard.
    ///
    /// Returns `None` iff nothing was dirty, so the persister can skip the
    /// I/O batch entirely on quiescent shards. Otherwise the map carries an
    /// entry for every rollup granularity, possibly empty.
    pub fn dirty_slots_to_persist(
        &self,
        shard: u32,
    ) -> Option<HashMap<Granularity, HashMap<u32, StampSnapshot>>> {
        let mut slot_times = HashMap::new();
        let mut updates = 0;

        for gran in Granularity::rollup_granularities() {
            let dirty = self
                .slot_state_manager(shard, *gran)
                .dirty_slots_and_mark_clean();
            updates += dirty.len();
            slot_times.insert(*gran, dirty);
        }

        if updates > 0 {
            // Ingest dirties one slot per granularity, so a busy shard
            // typically shows a multiple of the granularity count here.
            debug!(shard, updates, "found dirty slots");
            return Some(slot_times);
        }
        None
    }

    /// Merges one slot's persisted state, routed by its granularity.
    pub fn update_slot_on_read(&self, shard: u32, slot_state: &SlotState) {
        self.slot_state_manager(shard, slot_state.granularity)
            .update_slot_on_read(slot_state);
    }

    /// Walks the granularity ladder upward from a slot whose rollup just
    /// completed, making sure every ancestor is Active so coarser rollups
    /// re-run over the fresh child data.
    ///
    /// An absent ancestor is created Active and dirty: the child completing
    /// proves unrolled data exists in the parent even if the parent never
    /// saw ingest of its own. A non-Active ancestor is reactivated and
    /// restamped. An ancestor already Active is left untouched; restamping
    /// it would falsely extend its age and delay its rollup.
    pub fn mark_coarser_slots_dirty(&self, shard: u32, granularity: Granularity, slot: u32) {
        let mut gran = granularity;
        let mut cur_slot = slot;

        loop {
            let Ok(coarser) = gran.coarser() else {
                break;
            };
            let Ok(parent_slot) = coarser.slot_from_finer_slot(cur_slot) else {
                break;
            };

            let slots = self.slot_state_manager(shard, coarser).slot_stamps();
            match slots.get(&parent_slot) {
                None => {
                    debug!(
                        parent = %coarser.locator_key(parent_slot, shard),
                        child = %granularity.locator_key(slot, shard),
                        "no stamp for coarser slot"
                    );
                    // Race-tolerant insert: ingest may create it first.
                    slots.entry(parent_slot).or_insert_with(|| {
                        UpdateStamp::new(self.clock.now_millis(), StampState::Active, true)
                    });
                }
                Some(stamp) => {
                    if stamp.state() != StampState::Active {
                        self.metrics.parent_before_child.inc();
                        debug!(
                            parent = %coarser.locator_key(parent_slot, shard),
                            child = %granularity.locator_key(slot, shard),
                            "coarser slot not active when finer slot rolled, marking dirty"
                        );
                        stamp.set_state(StampState::Active);
                        stamp.set_dirty(true);
                        stamp.set_timestamp(self.clock.now_millis());
                    }
                }
            }

            gran = coarser;
            cur_slot = parent_slot;
        }
    }
}
