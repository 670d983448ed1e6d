//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Checking host prerequisites (CPU count, pinning)
//! - Collecting span samples
//! - Writing temporary configuration files

use cycle_common::metrics::{ElapsedMetrics, MetricsSnapshot};
use cycle_common::reading::Elapsed;
use cycle_timer::{allowed_cpus, Capabilities, CycleTimer};
use std::io::Write;
use std::time::Duration;

/// Result of a sampling session.
#[derive(Debug, Clone)]
pub struct SampleRun {
    /// Every span taken.
    pub spans: Vec<Elapsed>,
    /// Statistics over the spans.
    pub snapshot: MetricsSnapshot,
}

impl SampleRun {
    /// Fraction of spans flagged as anomalous.
    pub fn anomaly_rate(&self) -> f64 {
        if self.snapshot.total == 0 {
            return 0.0;
        }
        self.snapshot.anomaly_count as f64 / self.snapshot.total as f64
    }
}

/// Take `count` back-to-back spans around `work`.
pub fn sample_spans<F: FnMut()>(
    timer: &CycleTimer,
    count: usize,
    strict: bool,
    mut work: F,
) -> SampleRun {
    let mut metrics = ElapsedMetrics::new(count.max(1));
    let mut spans = Vec::with_capacity(count);

    for _ in 0..count {
        let start = timer.read(strict);
        work();
        let end = timer.read(strict);
        let span = timer.elapsed(start, end);
        metrics.record(&span);
        spans.push(span);
    }

    SampleRun {
        spans,
        snapshot: metrics.snapshot(&[50.0, 99.0]),
    }
}

/// Get the number of CPUs.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Check prerequisites for pinned measurement tests.
pub fn check_pinning_prerequisites() -> Result<Vec<usize>, String> {
    if !cfg!(target_os = "linux") {
        return Err("CPU pinning is only supported on Linux".into());
    }

    let cpus = allowed_cpus().map_err(|e| e.to_string())?;
    if cpus.is_empty() {
        return Err("no CPUs in the affinity mask".into());
    }

    if !Capabilities::detect().invariant_tsc {
        eprintln!("WARNING: TSC is not invariant - cycle counts may drift");
    }

    Ok(cpus)
}

/// Write `content` to a temporary TOML file.
pub fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("failed to write temp config");
    file
}

/// Burn roughly `duration` of CPU without sleeping.
pub fn spin_for(duration: Duration) {
    let start = std::time::Instant::now();
    let mut x: u64 = 1;
    while start.elapsed() < duration {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
    }
    std::hint::black_box(x);
}
