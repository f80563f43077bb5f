use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

/// Lifecycle state of a slot in the rollup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StampState {
    /// The slot holds unrolled data; a rollup is pending.
    Active,
    /// The persisted rollup reflects the slot's timestamp; nothing to do.
    Rolled,
    /// A rollup is in progress for the slot.
    Running,
}

impl StampState {
    fn from_u8(v: u8) -> StampState {
        match v {
            0 => StampState::Active,
            1 => StampState::Rolled,
            _ => StampState::Running,
        }
    }
}

impl fmt::Display for StampState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StampState::Active => "Active",
            StampState::Rolled => "Rolled",
            StampState::Running => "Running",
        })
    }
}

/// Per-(shard, granularity, slot) cell: the collection time of the newest
/// sample known to belong in the slot, the slot's lifecycle state, and
/// whether the in-memory view has diverged from what was last persisted.
///
/// Fields are independent relaxed atomics; there is no per-stamp lock. A
/// reader can pair a fresh timestamp with a stale state. That tear is
/// benign: every consumer re-reads the cell and all tracker invariants are
/// eventual, not per-operation.
pub struct UpdateStamp {
    timestamp: AtomicI64,
    state: AtomicU8,
    dirty: AtomicBool,
}

impl UpdateStamp {
    /// Creates a stamp with the given fields.
    pub fn new(timestamp: i64, state: StampState, dirty: bool) -> Self {
        Self {
            timestamp: AtomicI64::new(timestamp),
            state: AtomicU8::new(state as u8),
            dirty: AtomicBool::new(dirty),
        }
    }

    /// Collection time, in epoch milliseconds, of the newest sample known
    /// to belong in this slot.
    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    pub fn set_timestamp(&self, millis: i64) {
        self.timestamp.store(millis, Ordering::Relaxed);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StampState {
        StampState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: StampState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Whether the stamp has diverged from the last persisted flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all three fields.
    pub fn snapshot(&self) -> StampSnapshot {
        StampSnapshot {
            timestamp: self.timestamp(),
            state: self.state(),
            dirty: self.is_dirty(),
        }
    }
}

impl fmt::Debug for UpdateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateStamp")
            .field("timestamp", &self.timestamp())
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Point-in-time view of an [`UpdateStamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampSnapshot {
    pub timestamp: i64,
    pub state: StampState,
    pub dirty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_fields_round_trip() {
        let stamp = UpdateStamp::new(1_000, StampState::Active, true);
        assert_eq!(stamp.timestamp(), 1_000);
        assert_eq!(stamp.state(), StampState::Active);
        assert!(stamp.is_dirty());

        stamp.set_timestamp(2_000);
        stamp.set_state(StampState::Running);
        stamp.set_dirty(false);

        assert_eq!(stamp.timestamp(), 2_000);
        assert_eq!(stamp.state(), StampState::Running);
        assert!(!stamp.is_dirty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let stamp = UpdateStamp::new(500, StampState::Rolled, false);
        let snap = stamp.snapshot();

        stamp.set_timestamp(900);
        stamp.set_state(StampState::Active);
        stamp.set_dirty(true);

        assert_eq!(snap.timestamp, 500);
        assert_eq!(snap.state, StampState::Rolled);
        assert!(!snap.dirty);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StampState::Active.to_string(), "Active");
        assert_eq!(StampState::Rolled.to_string(), "Rolled");
        assert_eq!(StampState::Running.to_string(), "Running");
    }

    #[test]
    fn test_concurrent_mutation_is_safe() {
        use std::sync::Arc;
        use std::thread;

        let stamp = Arc::new(UpdateStamp::new(0, StampState::Active, false));
        let mut handles = Vec::new();

        for t in 0..4i64 {
            let stamp = Arc::clone(&stamp);
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    stamp.set_timestamp(t * 1000 + i);
                    stamp.set_dirty(true);
                }
            }));
        }

        for h in handles {
            h.join().expect("thread panicked");
        }

        // The last writer's timestamp is one of the written values and the
        // dirty flag stuck.
        assert!(stamp.timestamp() < 4000);
        assert!(stamp.is_dirty());
    }
}
