//! Elapsed-cycle statistics.
//!
//! Provides a ring buffer-based histogram for tracking measured spans
//! without heap allocations while recording.

use crate::reading::{Elapsed, ElapsedCycles};

/// Statistics over a stream of [`Elapsed`] results.
#[derive(Debug)]
pub struct ElapsedMetrics {
    /// Ring buffer of elapsed cycle counts.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples retained (saturates at buffer size).
    sample_count: usize,
    /// Total spans recorded, anomalous ones included.
    total: u64,
    /// Minimum clean span.
    min_cycles: u64,
    /// Maximum clean span.
    max_cycles: u64,
    /// Sum of clean spans for mean calculation.
    sum_cycles: u128,
    /// Spans flagged with a measurement anomaly.
    anomaly_count: u64,
}

impl ElapsedMetrics {
    /// Create a collector retaining the last `histogram_size` clean spans.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total: 0,
            min_cycles: u64::MAX,
            max_cycles: 0,
            sum_cycles: 0,
            anomaly_count: 0,
        }
    }

    /// Record one measurement.
    ///
    /// Anomalous spans are counted but kept out of the distribution, so a
    /// clamped zero never drags the minimum down.
    pub fn record(&mut self, elapsed: &Elapsed) {
        if elapsed.is_anomalous() {
            self.total += 1;
            self.anomaly_count += 1;
            return;
        }
        self.record_cycles(elapsed.cycles.get());
    }

    /// Record a clean span in raw ticks.
    pub fn record_cycles(&mut self, cycles: u64) {
        self.total += 1;
        self.samples[self.write_pos] = cycles;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.min_cycles = self.min_cycles.min(cycles);
        self.max_cycles = self.max_cycles.max(cycles);
        self.sum_cycles += u128::from(cycles);
    }

    fn clean_count(&self) -> u64 {
        self.total - self.anomaly_count
    }

    /// Total spans recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of anomalous spans.
    #[must_use]
    pub fn anomaly_count(&self) -> u64 {
        self.anomaly_count
    }

    /// Smallest clean span.
    #[must_use]
    pub fn min(&self) -> Option<u64> {
        (self.sample_count > 0).then_some(self.min_cycles)
    }

    /// Largest clean span.
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        (self.sample_count > 0).then_some(self.max_cycles)
    }

    /// Mean of clean spans.
    #[must_use]
    pub fn mean(&self) -> Option<u64> {
        let clean = self.clean_count();
        if self.sample_count == 0 || clean == 0 {
            return None;
        }
        u64::try_from(self.sum_cycles / u128::from(clean)).ok()
    }

    /// Sum of all clean spans, clamped at `u64::MAX`.
    #[must_use]
    pub fn total_cycles(&self) -> ElapsedCycles {
        ElapsedCycles(u64::try_from(self.sum_cycles).unwrap_or(u64::MAX))
    }

    /// Compute multiple percentiles over the retained window.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, u64)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|&&p| (0.0..=100.0).contains(&p))
            .map(|&p| (p, sorted[rank(p, sorted.len())]))
            .collect()
    }

    /// Compute a single percentile over the retained window.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        self.percentiles(&[percentile]).first().map(|&(_, v)| v)
    }

    /// Get a snapshot of current statistics.
    #[must_use]
    pub fn snapshot(&self, percentiles: &[f64]) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total,
            anomaly_count: self.anomaly_count,
            sample_count: self.sample_count,
            min_cycles: self.min(),
            max_cycles: self.max(),
            mean_cycles: self.mean(),
            total_cycles: self.total_cycles().get(),
            percentiles: self.percentiles(percentiles),
        }
    }

    /// Reset all statistics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total = 0;
        self.min_cycles = u64::MAX;
        self.max_cycles = 0;
        self.sum_cycles = 0;
        self.anomaly_count = 0;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn rank(percentile: f64, len: usize) -> usize {
    let idx = ((percentile / 100.0) * (len - 1) as f64).round() as usize;
    idx.min(len - 1)
}

/// Immutable snapshot of statistics for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total spans recorded.
    pub total: u64,
    /// Spans flagged with an anomaly.
    pub anomaly_count: u64,
    /// Spans retained in the histogram.
    pub sample_count: usize,
    /// Smallest clean span.
    pub min_cycles: Option<u64>,
    /// Largest clean span.
    pub max_cycles: Option<u64>,
    /// Mean clean span.
    pub mean_cycles: Option<u64>,
    /// Sum of all clean spans.
    pub total_cycles: u64,
    /// Requested percentiles as `(percentile, cycles)`.
    pub percentiles: Vec<(f64, u64)>,
}

impl MetricsSnapshot {
    /// Spread between the largest and smallest clean span.
    #[must_use]
    pub fn jitter_cycles(&self) -> Option<u64> {
        match (self.min_cycles, self.max_cycles) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
