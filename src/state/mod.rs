//! The rollup state machine over (shard, granularity, slot).
//!
//! Each cell is an [`UpdateStamp`]; [`SlotStateManager`] owns the cells of
//! one (shard, granularity) pair and implements the merge algebra that
//! makes the cluster converge; [`ShardStateManager`] aggregates them across
//! the shard universe and propagates dirtiness up the granularity ladder.
//!
//! Expected callers: many ingest threads stamping slots, puller threads
//! merging persisted state back in, one pusher thread draining dirty sets,
//! and a rollup executor pool moving slots through Active -> Running ->
//! Rolled. Every operation is a non-blocking in-memory read or write; no
//! lock here ever spans an external call.

pub mod shard;
pub mod slot;
pub mod stamp;

use std::fmt;

pub use shard::ShardStateManager;
pub use slot::SlotStateManager;
pub use stamp::{StampSnapshot, StampState, UpdateStamp};

use crate::granularity::Granularity;

/// One slot's state as read back from the persisted cluster view, consumed
/// by [`ShardStateManager::update_slot_on_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    pub granularity: Granularity,
    pub slot: u32,
    pub timestamp: i64,
    pub state: StampState,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}: {},{}",
            self.granularity, self.slot, self.timestamp, self.state
        )
    }
}
