//! Output formatting for the demo.
//!
//! Standard output carries only these formats so it can be consumed by
//! scripts; all diagnostics go through `tracing` to stderr.

use cycle_common::metrics::MetricsSnapshot;
use cycle_common::reading::{CoreLocation, CounterSource, Elapsed};
use cycle_timer::{Calibration, Capabilities};
use serde::Serialize;

/// One measured span as printed on stdout: decimal cycles, a space, newline.
pub fn format_sample(span: &Elapsed) -> String {
    format!("{} \n", span.cycles)
}

/// What the host offers, printed by `--probe`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Detected counter capabilities.
    pub capabilities: Capabilities,
    /// Source the configured timer settled on.
    pub selected_source: CounterSource,
    /// Whether the selected source is the monotonic fallback.
    pub fallback: bool,
    /// Online CPUs.
    pub online_cpus: usize,
    /// CPUs this thread may run on.
    pub allowed_cpus: Vec<usize>,
    /// Where the probe ran.
    pub location: Option<CoreLocation>,
}

/// Statistics over all samples, printed by `--summary`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    /// Counter source used.
    pub source: CounterSource,
    /// Whether serialized reads were used.
    pub strict: bool,
    /// CPUs the measuring thread was pinned to.
    pub pinned_cpus: Option<Vec<usize>>,
    /// Counter rate, when calibration succeeded.
    pub calibration: Option<Calibration>,
    /// Mean span converted to nanoseconds, when calibrated.
    pub mean_nanos: Option<u64>,
    /// Span statistics.
    pub metrics: MetricsSnapshot,
}

impl SummaryReport {
    /// Build a summary, deriving wall time from the calibration if present.
    pub fn new(
        source: CounterSource,
        strict: bool,
        pinned_cpus: Option<Vec<usize>>,
        calibration: Option<Calibration>,
        metrics: MetricsSnapshot,
    ) -> Self {
        let mean_nanos = calibration.zip(metrics.mean_cycles).map(|(cal, mean)| {
            let nanos = cal
                .to_duration(cycle_common::reading::ElapsedCycles(mean))
                .as_nanos();
            u64::try_from(nanos).unwrap_or(u64::MAX)
        });

        Self {
            source,
            strict,
            pinned_cpus,
            calibration,
            mean_nanos,
            metrics,
        }
    }
}

/// Render any report as pretty JSON followed by a newline.
pub fn to_json<T: Serialize>(report: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report).map(|mut s| {
        s.push('\n');
        s
    })
}
