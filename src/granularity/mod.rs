//! The granularity ladder and its slot arithmetic.
//!
//! Samples are stored at full resolution and rolled up into five coarser
//! resolutions. Every granularity divides time into a fixed ring of slots
//! covering a 14-day window; slot ids wrap modulo the slot count, so the
//! slot space is finite and reused cyclically.

use std::fmt;

use thiserror::Error;

/// Errors raised when walking off either end of the granularity ladder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranularityError {
    #[error("no granularity coarser than {0}")]
    NoCoarser(Granularity),

    #[error("no granularity finer than {0}")]
    NoFiner(Granularity),
}

/// A discrete resolution at which samples are aggregated.
///
/// Ordered finest to coarsest: full resolution, then 5m/20m/60m/240m/1440m
/// buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Full,
    Min5,
    Min20,
    Min60,
    Min240,
    Min1440,
}

/// The whole ladder, finest first.
const LADDER: [Granularity; 6] = [
    Granularity::Full,
    Granularity::Min5,
    Granularity::Min20,
    Granularity::Min60,
    Granularity::Min240,
    Granularity::Min1440,
];

/// The granularities rollups are computed at (everything above full
/// resolution), finest first.
const ROLLUP_LADDER: [Granularity; 5] = [
    Granularity::Min5,
    Granularity::Min20,
    Granularity::Min60,
    Granularity::Min240,
    Granularity::Min1440,
];

impl Granularity {
    /// The granularities rollups are scheduled for, finest first.
    pub fn rollup_granularities() -> &'static [Granularity] {
        &ROLLUP_LADDER
    }

    /// Persisted name of this granularity, used in locator keys.
    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Full => "metrics_full",
            Granularity::Min5 => "metrics_5m",
            Granularity::Min20 => "metrics_20m",
            Granularity::Min60 => "metrics_60m",
            Granularity::Min240 => "metrics_240m",
            Granularity::Min1440 => "metrics_1440m",
        }
    }

    /// Position in the ladder; 0 is full resolution.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Slot width in milliseconds. Full-resolution data shares the 5m slot
    /// width: it is bucketed, not aggregated.
    pub fn milliseconds(&self) -> i64 {
        match self {
            Granularity::Full | Granularity::Min5 => 300_000,
            Granularity::Min20 => 1_200_000,
            Granularity::Min60 => 3_600_000,
            Granularity::Min240 => 14_400_000,
            Granularity::Min1440 => 86_400_000,
        }
    }

    /// Number of slots in this granularity's ring. Every granularity spans
    /// the same 14-day window.
    pub fn num_slots(&self) -> u32 {
        match self {
            Granularity::Full | Granularity::Min5 => 4032,
            Granularity::Min20 => 1008,
            Granularity::Min60 => 336,
            Granularity::Min240 => 84,
            Granularity::Min1440 => 14,
        }
    }

    /// The slot a collection timestamp falls into, wrapping modulo the ring.
    pub fn slot(&self, timestamp_ms: i64) -> u32 {
        ((timestamp_ms / self.milliseconds()) % i64::from(self.num_slots())) as u32
    }

    /// The next coarser granularity.
    pub fn coarser(&self) -> Result<Granularity, GranularityError> {
        LADDER
            .get(self.index() + 1)
            .copied()
            .ok_or(GranularityError::NoCoarser(*self))
    }

    /// The next finer granularity.
    pub fn finer(&self) -> Result<Granularity, GranularityError> {
        self.index()
            .checked_sub(1)
            .and_then(|i| LADDER.get(i).copied())
            .ok_or(GranularityError::NoFiner(*self))
    }

    /// Maps a slot of the next finer granularity onto this granularity's
    /// ring.
    pub fn slot_from_finer_slot(&self, finer_slot: u32) -> Result<u32, GranularityError> {
        let finer = self.finer()?;
        Ok(finer_slot * self.num_slots() / finer.num_slots())
    }

    /// String key identifying (granularity, slot, shard) in persisted state.
    pub fn locator_key(&self, slot: u32, shard: u32) -> String {
        format!("{},{},{}", self.name(), slot, shard)
    }

    /// Locator keys of every strictly finer slot contained in this slot,
    /// across all finer granularities down to full resolution.
    pub fn children_keys(&self, slot: u32, shard: u32) -> Vec<String> {
        let mut keys = Vec::new();
        for finer in &LADDER[..self.index()] {
            // Slot counts divide evenly along the ladder, so the children
            // at each finer level form a contiguous run.
            let factor = finer.num_slots() / self.num_slots();
            for child in slot * factor..(slot + 1) * factor {
                keys.push(finer.locator_key(child, shard));
            }
        }
        keys
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
