//! Rollup state tracking for a sharded time-series metrics store.
//!
//! Metric samples arrive from many ingestor nodes and are periodically
//! aggregated into coarser time buckets. This crate is the coordination
//! core that decides which (shard, granularity, slot) cells hold unrolled
//! data and are due for rollup, and that converges that knowledge across
//! ingestor and rollup nodes which communicate only through persisted
//! shard state.
//!
//! The scheduler loop, the shard-state pusher/puller, and the rollup
//! computation itself live outside this crate; they drive it through
//! [`state::ShardStateManager`].

pub mod clock;
pub mod config;
pub mod granularity;
pub mod state;
pub mod telemetry;
pub mod types;
