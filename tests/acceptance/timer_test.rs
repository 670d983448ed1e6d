//! Timer behaviour acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - `elapsed(a, b) == b - a` for ordered readings, zero plus anomaly otherwise
//! - Capability failures surface at construction as `UnsupportedPlatform`
//! - Back-to-back reads are non-decreasing in at least 99% of samples
//! - Configuration files drive source selection and fallback

use super::common::{sample_spans, spin_for, write_config};
use cycle_common::config::TimingConfig;
use cycle_common::error::TimingError;
use cycle_common::reading::{elapsed, CounterSource, CycleReading, ElapsedCycles};
use cycle_timer::{Capabilities, CycleTimer};
use std::time::Duration;

#[test]
fn test_end_to_end_scenarios() {
    let timer = CycleTimer::new().expect("no usable counter");
    let at = |ticks| CycleReading::new(ticks, timer.source());

    let forward = timer.elapsed(at(1000), at(1500));
    assert_eq!(forward.cycles, ElapsedCycles(500));
    assert!(!forward.is_anomalous());

    let backward = timer.elapsed(at(2000), at(1000));
    assert_eq!(backward.cycles, ElapsedCycles(0));
    assert!(backward.is_anomalous());

    let same = timer.elapsed(at(777), at(777));
    assert_eq!(same.cycles, ElapsedCycles(0));
    assert!(!same.is_anomalous());
}

#[test]
fn test_readings_from_different_timers_do_not_mix() {
    let start = CycleReading::new(100, CounterSource::Rdtscp);
    let end = CycleReading::new(5_000_000, CounterSource::MonotonicFallback);
    let span = elapsed(start, end);
    assert_eq!(span.cycles, ElapsedCycles::ZERO);
    assert!(span.is_anomalous());
}

#[test]
fn test_unsupported_source_reported_once_at_construction() {
    let caps = Capabilities::detect();

    for source in [
        CounterSource::Rdtsc,
        CounterSource::Rdtscp,
        CounterSource::MonotonicFallback,
    ] {
        match CycleTimer::with_source(source) {
            Ok(timer) => {
                assert!(caps.check(source).is_ok());
                // Once built, reads never fail
                let run = sample_spans(&timer, 100, false, || {});
                assert_eq!(run.spans.len(), 100);
            }
            Err(err) => {
                assert!(caps.check(source).is_err());
                assert!(matches!(
                    err,
                    TimingError::UnsupportedPlatform { counter, .. } if counter == source
                ));
            }
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[test]
fn test_no_tsc_off_x86_64() {
    let err = CycleTimer::with_source(CounterSource::Rdtsc).unwrap_err();
    assert!(err.is_unsupported_platform());

    // Callers can substitute the lower-resolution clock
    let timer = CycleTimer::with_source(CounterSource::MonotonicFallback).unwrap();
    assert!(timer.is_fallback());
}

#[test]
fn test_back_to_back_reads_non_decreasing() {
    let timer = CycleTimer::new().unwrap();

    for strict in [false, true] {
        let run = sample_spans(&timer, 50_000, strict, || {});
        assert!(
            run.anomaly_rate() < 0.01,
            "strict={strict}: {} of {} spans went backwards",
            run.snapshot.anomaly_count,
            run.snapshot.total
        );
    }
}

#[test]
fn test_longer_work_measures_longer() {
    let timer = CycleTimer::new().unwrap();

    let short = sample_spans(&timer, 5, true, || spin_for(Duration::from_micros(200)));
    let long = sample_spans(&timer, 5, true, || spin_for(Duration::from_millis(5)));

    let short_median = short.snapshot.percentiles[0].1;
    let long_median = long.snapshot.percentiles[0].1;
    assert!(
        long_median > short_median,
        "5ms spin ({long_median}) not longer than 200us spin ({short_median})"
    );
}

#[test]
fn test_config_file_selects_monotonic() {
    let file = write_config(
        r#"
        [timer]
        source = "monotonic"
        allow_fallback = false

        [measure]
        sleep = "2ms"
        "#,
    );

    let config = TimingConfig::from_file(file.path()).unwrap();
    let timer = match CycleTimer::from_config(&config.timer) {
        Ok(timer) => timer,
        Err(err) => {
            assert!(err.is_unsupported_platform());
            return;
        }
    };
    assert!(timer.is_fallback());

    let ((), span) = timer.measure(|| std::thread::sleep(config.measure.sleep));
    assert!(span.cycles.get() >= 2_000_000, "{span:?}");
}

#[test]
fn test_config_fallback_never_fails_with_clock() {
    let file = write_config("[timer]\nsource = \"rdtscp\"\nallow_fallback = true\n");
    let config = TimingConfig::from_file(file.path()).unwrap();

    if Capabilities::detect().monotonic_clock {
        let timer = CycleTimer::from_config(&config.timer).unwrap();
        assert!(timer.source() == CounterSource::Rdtscp || timer.is_fallback());
    }
}
