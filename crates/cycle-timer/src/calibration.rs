//! Counter frequency estimation.
//!
//! Cycle counts are only meaningful relative to the counter rate. A
//! [`Calibration`] is measured once by timing a sleep against the OS clock
//! and then converts spans in either direction.

use crate::timer::CycleTimer;
use cycle_common::error::{TimingError, TimingResult};
use cycle_common::reading::{CounterSource, ElapsedCycles};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Measured counter rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calibration {
    /// Source the rate applies to.
    pub source: CounterSource,
    /// Counter ticks per second.
    pub ticks_per_second: u64,
}

impl Calibration {
    /// Convert a span to wall time.
    #[must_use]
    pub fn to_duration(&self, cycles: ElapsedCycles) -> Duration {
        let nanos = u128::from(cycles.get()) * u128::from(NANOS_PER_SEC)
            / u128::from(self.ticks_per_second.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Convert wall time to the expected number of ticks.
    #[must_use]
    pub fn to_cycles(&self, duration: Duration) -> ElapsedCycles {
        let ticks =
            duration.as_nanos() * u128::from(self.ticks_per_second) / u128::from(NANOS_PER_SEC);
        ElapsedCycles(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Counter rate in GHz.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ghz(&self) -> f64 {
        self.ticks_per_second as f64 / 1e9
    }
}

/// Estimate how fast `timer` ticks by sleeping for `window`.
///
/// The fallback clock counts nanoseconds by definition and returns without
/// sleeping.
///
/// # Errors
///
/// Returns [`TimingError::Calibration`] if `window` is zero or the counter did
/// not advance cleanly across the window.
pub fn calibrate(timer: &CycleTimer, window: Duration) -> TimingResult<Calibration> {
    if timer.is_fallback() {
        return Ok(Calibration {
            source: timer.source(),
            ticks_per_second: NANOS_PER_SEC,
        });
    }

    if window.is_zero() {
        return Err(TimingError::Calibration(
            "calibration window must be non-zero".into(),
        ));
    }

    debug!(?window, source = %timer.source(), "Calibrating counter");

    let wall_start = Instant::now();
    let start = timer.now_strict();
    std::thread::sleep(window);
    let end = timer.now_strict();
    let wall = wall_start.elapsed();

    let span = timer.elapsed(start, end);
    if let Some(anomaly) = span.anomaly {
        return Err(TimingError::Calibration(format!(
            "counter anomaly during calibration: {anomaly}"
        )));
    }
    if span.cycles == ElapsedCycles::ZERO {
        return Err(TimingError::Calibration(
            "counter did not advance during calibration".into(),
        ));
    }

    let ticks = u128::from(span.cycles.get()) * u128::from(NANOS_PER_SEC) / wall.as_nanos().max(1);
    if ticks == 0 {
        return Err(TimingError::Calibration(format!(
            "counter rate below 1 Hz ({} ticks in {wall:?})",
            span.cycles
        )));
    }
    let calibration = Calibration {
        source: timer.source(),
        ticks_per_second: u64::try_from(ticks).unwrap_or(u64::MAX),
    };

    info!(
        source = %calibration.source,
        ticks_per_second = calibration.ticks_per_second,
        "Counter calibrated"
    );
    Ok(calibration)
}
