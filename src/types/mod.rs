//! The taxonomy of rollup value kinds.
//!
//! Values flowing to the persister carry an explicit kind tag; the tag and
//! the granularity together select the serialized form. The state tracker
//! itself treats the tag opaquely.

use std::fmt;

use crate::granularity::Granularity;

/// Kind tag carried by every value the persister serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupKind {
    Counter,
    Timer,
    Set,
    Gauge,
    Histogram,
    Basic,
    NotARollup,
}

/// Kinds whose aggregates are a plain count/sum/min/max shape.
pub const SIMPLE_KINDS: [RollupKind; 4] = [
    RollupKind::Counter,
    RollupKind::Set,
    RollupKind::Gauge,
    RollupKind::Basic,
];

impl RollupKind {
    /// Canonical persisted name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            RollupKind::Counter => "COUNTER",
            RollupKind::Timer => "TIMER",
            RollupKind::Set => "SET",
            RollupKind::Gauge => "GAUGE",
            RollupKind::Histogram => "BF_HISTOGRAMS",
            RollupKind::Basic => "BF_BASIC",
            RollupKind::NotARollup => "NOT_A_ROLLUP",
        }
    }

    /// Parses a persisted kind name, case-insensitively. Unknown or empty
    /// input maps to [`RollupKind::Basic`]: legacy rows predate the tag.
    pub fn from_name(s: &str) -> RollupKind {
        let all = [
            RollupKind::Counter,
            RollupKind::Timer,
            RollupKind::Set,
            RollupKind::Gauge,
            RollupKind::Histogram,
            RollupKind::Basic,
            RollupKind::NotARollup,
        ];
        all.into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .unwrap_or(RollupKind::Basic)
    }
}

impl fmt::Display for RollupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Count/sum/min/max aggregate shared by the simple kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

/// Timer aggregate: the basic shape plus a per-second rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub rate: f64,
}

/// A value bound for the persister, tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupValue {
    /// A raw full-resolution sample; not a rollup.
    Sample(f64),
    Basic(BasicAggregate),
    Counter { count: u64, rate: f64 },
    Timer(TimerAggregate),
    Set { distinct: u64 },
    Gauge { latest: f64, collected_at_ms: i64 },
    Histogram { bins: Vec<(f64, u64)> },
}

impl RollupValue {
    /// The kind tag of this value.
    pub fn kind(&self) -> RollupKind {
        match self {
            RollupValue::Sample(_) => RollupKind::NotARollup,
            RollupValue::Basic(_) => RollupKind::Basic,
            RollupValue::Counter { .. } => RollupKind::Counter,
            RollupValue::Timer(_) => RollupKind::Timer,
            RollupValue::Set { .. } => RollupKind::Set,
            RollupValue::Gauge { .. } => RollupKind::Gauge,
            RollupValue::Histogram { .. } => RollupKind::Histogram,
        }
    }
}

/// Serializer descriptor selected by (kind, granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    SingleSample,
    BasicAggregate,
    CounterAggregate,
    TimerAggregate,
    SetAggregate,
    GaugeAggregate,
    HistogramAggregate,
}

impl ValueClass {
    /// Selects the serialized form for a kind at a granularity. Basic
    /// values at full resolution are single samples; everything else is an
    /// aggregate.
    ///
    /// # Panics
    ///
    /// Asking for the class of [`RollupKind::NotARollup`] is a programming
    /// error: raw samples never reach the serializer.
    pub fn of(kind: RollupKind, granularity: Granularity) -> ValueClass {
        match (kind, granularity) {
            (RollupKind::Counter, _) => ValueClass::CounterAggregate,
            (RollupKind::Timer, _) => ValueClass::TimerAggregate,
            (RollupKind::Set, _) => ValueClass::SetAggregate,
            (RollupKind::Gauge, _) => ValueClass::GaugeAggregate,
            (RollupKind::Basic, Granularity::Full) => ValueClass::SingleSample,
            (RollupKind::Basic, _) => ValueClass::BasicAggregate,
            (RollupKind::Histogram, _) => ValueClass::HistogramAggregate,
            (RollupKind::NotARollup, gran) => {
                panic!("no value class for kind {kind} at {gran}")
            }
        }
    }
}
