use anyhow::Result;
use prometheus::{Counter, Histogram, HistogramOpts, Opts, Registry};

/// Prometheus metrics for the rollup state tracker.
///
/// All metrics use the "rollsync" namespace. Sinks are fire-and-forget:
/// nothing in the state machine ever blocks on or propagates a telemetry
/// failure.
pub struct TrackerMetrics {
    registry: Registry,

    /// Slot stamp updates applied on the ingest path.
    pub slot_updates: Counter,
    /// Slots reactivated by ingest after they had already been rolled.
    pub re_rollups: Counter,
    /// Coarser slots found in a non-Active state when a finer slot
    /// finished rolling.
    pub parent_before_child: Counter,
    /// Elapsed time since last update, in milliseconds, for every slot
    /// visited by the rollup-age scan.
    pub time_since_update_ms: Histogram,
}

impl TrackerMetrics {
    /// Creates a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let slot_updates = Counter::with_opts(
            Opts::new("slot_updates_total", "Slot stamp updates from ingest").namespace("rollsync"),
        )?;
        registry.register(Box::new(slot_updates.clone()))?;

        let re_rollups = Counter::with_opts(
            Opts::new(
                "re_rollups_total",
                "Rolled slots reactivated because new data arrived",
            )
            .namespace("rollsync"),
        )?;
        registry.register(Box::new(re_rollups.clone()))?;

        let parent_before_child = Counter::with_opts(
            Opts::new(
                "parent_before_child_total",
                "Coarser slots rolled before a finer slot finished",
            )
            .namespace("rollsync"),
        )?;
        registry.register(Box::new(parent_before_child.clone()))?;

        // Rollup slots age from minutes to days; 1s .. ~48h exponential.
        let time_since_update_ms = Histogram::with_opts(
            HistogramOpts::new(
                "slot_time_since_update_milliseconds",
                "Elapsed time since a slot's last update when scanned for rollup",
            )
            .namespace("rollsync")
            .buckets(prometheus::exponential_buckets(1_000.0, 4.0, 10)?),
        )?;
        registry.register(Box::new(time_since_update_ms.clone()))?;

        Ok(Self {
            registry,
            slot_updates,
            re_rollups,
            parent_before_child,
            time_since_update_ms,
        })
    }

    /// The underlying registry, for embedding into whatever exporter the
    /// host process runs.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
