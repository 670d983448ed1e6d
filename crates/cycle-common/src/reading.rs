//! Counter readings and elapsed-cycle arithmetic.
//!
//! A [`CycleReading`] is only comparable with another reading from the same
//! [`CounterSource`], taken on the same core, in the same process. The
//! [`elapsed`] function enforces the first rule, saturates instead of wrapping,
//! and reports anything suspicious as a [`MeasurementAnomaly`] rather than an
//! error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use tracing::warn;

/// Where a counter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterSource {
    /// x86 `RDTSC`: time-stamp counter, not ordered against surrounding code.
    Rdtsc,
    /// x86 `RDTSCP`: waits for prior instructions and also returns `IA32_TSC_AUX`.
    Rdtscp,
    /// OS monotonic clock in nanoseconds, used when no cycle counter exists.
    #[serde(rename = "monotonic")]
    MonotonicFallback,
}

impl CounterSource {
    /// Whether this source is the nanosecond clock rather than a cycle counter.
    #[must_use]
    pub fn is_fallback(self) -> bool {
        matches!(self, CounterSource::MonotonicFallback)
    }
}

impl fmt::Display for CounterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterSource::Rdtsc => write!(f, "rdtsc"),
            CounterSource::Rdtscp => write!(f, "rdtscp"),
            CounterSource::MonotonicFallback => write!(f, "monotonic"),
        }
    }
}

/// Opaque counter value captured by a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleReading {
    ticks: u64,
    source: CounterSource,
}

impl CycleReading {
    /// Wrap a raw counter value.
    #[must_use]
    pub const fn new(ticks: u64, source: CounterSource) -> Self {
        Self { ticks, source }
    }

    /// Raw counter value (cycles, or nanoseconds for the fallback clock).
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.ticks
    }

    /// Source this reading was taken from.
    #[must_use]
    pub const fn source(self) -> CounterSource {
        self.source
    }
}

/// Physical placement of the thread at the time of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreLocation {
    /// Logical CPU index.
    pub cpu: u32,
    /// NUMA node index.
    pub node: u32,
}

impl CoreLocation {
    /// Decode the Linux `IA32_TSC_AUX` layout (`node << 12 | cpu`).
    #[must_use]
    pub const fn from_tsc_aux(aux: u32) -> Self {
        Self {
            cpu: aux & 0xfff,
            node: aux >> 12,
        }
    }
}

impl fmt::Display for CoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu = {}, node = {}", self.cpu, self.node)
    }
}

/// Reading paired with the core it was taken on, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedReading {
    /// Counter value.
    pub reading: CycleReading,
    /// Core the reading was taken on.
    pub location: Option<CoreLocation>,
}

/// Number of counter ticks between two readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct ElapsedCycles(pub u64);

impl ElapsedCycles {
    /// Zero-length span.
    pub const ZERO: Self = Self(0);

    /// Raw tick count.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Sum of two spans, clamped at `u64::MAX`.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for ElapsedCycles {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for ElapsedCycles {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sum for ElapsedCycles {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl<'a> Sum<&'a ElapsedCycles> for ElapsedCycles {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for ElapsedCycles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-fatal problem detected while computing an elapsed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementAnomaly {
    /// End reading precedes the start reading.
    Backwards {
        /// Start ticks.
        start: u64,
        /// End ticks.
        end: u64,
    },
    /// The readings came from different counter sources.
    SourceMismatch {
        /// Start reading source.
        start: CounterSource,
        /// End reading source.
        end: CounterSource,
    },
    /// The thread moved to another core between the readings.
    CoreMigration {
        /// Core of the start reading.
        from: CoreLocation,
        /// Core of the end reading.
        to: CoreLocation,
    },
}

impl fmt::Display for MeasurementAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementAnomaly::Backwards { start, end } => {
                write!(f, "end reading {end} precedes start reading {start}")
            }
            MeasurementAnomaly::SourceMismatch { start, end } => {
                write!(f, "readings from different sources ({start} vs {end})")
            }
            MeasurementAnomaly::CoreMigration { from, to } => {
                write!(f, "thread migrated from cpu {} to cpu {}", from.cpu, to.cpu)
            }
        }
    }
}

/// Result of an elapsed computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// Ticks between the readings (zero when clamped).
    pub cycles: ElapsedCycles,
    /// Set when the span should not be trusted.
    pub anomaly: Option<MeasurementAnomaly>,
}

impl Elapsed {
    fn clean(cycles: u64) -> Self {
        Self {
            cycles: ElapsedCycles(cycles),
            anomaly: None,
        }
    }

    fn clamped(anomaly: MeasurementAnomaly) -> Self {
        Self {
            cycles: ElapsedCycles::ZERO,
            anomaly: Some(anomaly),
        }
    }

    /// Whether an anomaly was flagged.
    #[must_use]
    pub fn is_anomalous(&self) -> bool {
        self.anomaly.is_some()
    }
}

/// Compute `end - start`, saturating at zero.
///
/// Never fails. A backwards span or a source mismatch yields zero cycles with
/// the anomaly flag set, and is logged at warn level.
#[must_use]
pub fn elapsed(start: CycleReading, end: CycleReading) -> Elapsed {
    if start.source != end.source {
        let anomaly = MeasurementAnomaly::SourceMismatch {
            start: start.source,
            end: end.source,
        };
        warn!(%anomaly, "Measurement anomaly, clamping to zero");
        return Elapsed::clamped(anomaly);
    }

    match end.ticks.checked_sub(start.ticks) {
        Some(delta) => Elapsed::clean(delta),
        None => {
            let anomaly = MeasurementAnomaly::Backwards {
                start: start.ticks,
                end: end.ticks,
            };
            warn!(
                source = %start.source,
                %anomaly,
                "Measurement anomaly, clamping to zero"
            );
            Elapsed::clamped(anomaly)
        }
    }
}

/// Like [`elapsed`], additionally flagging a change of core between the readings.
///
/// A migration keeps the computed delta but marks it as not meaningful.
#[must_use]
pub fn elapsed_tagged(start: TaggedReading, end: TaggedReading) -> Elapsed {
    let mut result = elapsed(start.reading, end.reading);
    if result.is_anomalous() {
        return result;
    }

    if let (Some(from), Some(to)) = (start.location, end.location) {
        if from.cpu != to.cpu {
            let anomaly = MeasurementAnomaly::CoreMigration { from, to };
            warn!(%anomaly, cycles = result.cycles.get(), "Measurement anomaly");
            result.anomaly = Some(anomaly);
        }
    }
    result
}
