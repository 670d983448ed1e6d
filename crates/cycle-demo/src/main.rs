//! Cycle timer demo entry point.
//!
//! Times a sleep with the CPU cycle counter and prints each delta as
//! `<cycles> \n` on stdout. Logging goes to stderr.

mod report;

use anyhow::{Context, Result};
use clap::Parser;
use cycle_common::config::{CpuAffinity, SourcePreference, TimingConfig};
use cycle_common::metrics::ElapsedMetrics;
use cycle_common::reading::Elapsed;
use cycle_timer::{
    allowed_cpus, calibrate, current_location, online_cpus, pin_current_thread, CycleTimer,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::report::{format_sample, to_json, ProbeReport, SummaryReport};

/// Demo command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "cycle-demo",
    about = "Time a sleep with the CPU cycle counter and print the elapsed cycles",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Counter source: auto, rdtsc, rdtscp, or monotonic.
    #[arg(long, value_name = "SOURCE")]
    source: Option<SourcePreference>,

    /// Use serialized counter reads.
    #[arg(long)]
    strict: bool,

    /// Fail instead of falling back to the monotonic clock.
    #[arg(long)]
    no_fallback: bool,

    /// Span to time per sample (e.g. "1s", "250ms").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    sleep: Option<Duration>,

    /// Number of samples.
    #[arg(long, value_name = "N")]
    samples: Option<usize>,

    /// Pin the measuring thread to this CPU.
    #[arg(long, value_name = "CPU")]
    cpu: Option<usize>,

    /// Print host counter capabilities as JSON and exit.
    #[arg(long)]
    probe: bool,

    /// Print a JSON statistics summary after the samples.
    #[arg(long)]
    summary: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting cycle demo");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args)?;

    info!(
        source = ?config.timer.source,
        strict = config.timer.strict,
        sleep = ?config.measure.sleep,
        samples = config.measure.samples,
        "Configuration loaded"
    );

    let timer = CycleTimer::from_config(&config.timer).context("Failed to initialize cycle timer")?;

    if args.probe {
        return print_probe(&timer);
    }

    run_samples(&timer, &config, args.summary)
}

/// Initialize logging with the specified log level, writing to stderr.
fn init_logging(level: &str) {
    let filter = format!("cycle_demo={level},cycle_timer={level},cycle_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `CYCLE_TIMER_CONFIG` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<TimingConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return TimingConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("CYCLE_TIMER_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from CYCLE_TIMER_CONFIG");
            return TimingConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from CYCLE_TIMER_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "CYCLE_TIMER_CONFIG set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return TimingConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(TimingConfig::default())
}

/// Command-line flags take precedence over the file.
fn apply_overrides(config: &mut TimingConfig, args: &Args) -> Result<()> {
    if let Some(source) = args.source {
        config.timer.source = source;
    }
    if args.strict {
        config.timer.strict = true;
    }
    if args.no_fallback {
        config.timer.allow_fallback = false;
    }
    if let Some(sleep) = args.sleep {
        config.measure.sleep = sleep;
    }
    if let Some(samples) = args.samples {
        config.measure.samples = samples;
    }
    if let Some(cpu) = args.cpu {
        config.placement.cpu_affinity = CpuAffinity::Single(cpu);
    }

    config
        .validate()
        .context("Invalid configuration after command-line overrides")
}

fn print_probe(timer: &CycleTimer) -> Result<()> {
    let report = ProbeReport {
        capabilities: timer.capabilities(),
        selected_source: timer.source(),
        fallback: timer.is_fallback(),
        online_cpus: online_cpus(),
        allowed_cpus: allowed_cpus().unwrap_or_default(),
        location: current_location(),
    };

    let json = to_json(&report).context("Failed to serialize probe report")?;
    std::io::stdout()
        .write_all(json.as_bytes())
        .context("Failed to write probe report")
}

/// Take one span per sample and print it.
fn run_samples(timer: &CycleTimer, config: &TimingConfig, summary: bool) -> Result<()> {
    let pinned = pin_current_thread(&config.placement.cpu_affinity)
        .context("Failed to pin measuring thread")?;

    let strict = config.timer.strict;
    let mut metrics = ElapsedMetrics::new(config.measure.histogram_size);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for sample in 0..config.measure.samples {
        let span = measure_sleep(timer, strict, config.measure.sleep);
        metrics.record(&span);

        if let Some(anomaly) = span.anomaly {
            warn!(sample, %anomaly, "Sample flagged");
        }

        out.write_all(format_sample(&span).as_bytes())
            .context("Failed to write sample")?;
        out.flush().context("Failed to flush stdout")?;
    }

    info!(
        samples = metrics.total(),
        anomalies = metrics.anomaly_count(),
        min = metrics.min().unwrap_or(0),
        max = metrics.max().unwrap_or(0),
        "Sampling complete"
    );

    if summary {
        let calibration = match calibrate(timer, config.timer.calibration_window) {
            Ok(calibration) => Some(calibration),
            Err(e) => {
                warn!(error = %e, "Calibration failed, summary will omit wall time");
                None
            }
        };

        let report = SummaryReport::new(
            timer.source(),
            strict,
            pinned,
            calibration,
            metrics.snapshot(&config.measure.percentiles),
        );
        let json = to_json(&report).context("Failed to serialize summary")?;
        out.write_all(json.as_bytes())
            .context("Failed to write summary")?;
    }

    Ok(())
}

/// Strict samples use tagged reads so a core migration is flagged too.
fn measure_sleep(timer: &CycleTimer, strict: bool, sleep: Duration) -> Elapsed {
    if strict {
        let start = timer.now_tagged();
        std::thread::sleep(sleep);
        let end = timer.now_tagged();
        timer.elapsed_tagged(start, end)
    } else {
        let start = timer.now();
        std::thread::sleep(sleep);
        let end = timer.now();
        timer.elapsed(start, end)
    }
}
