//! The cycle timer.
//!
//! A [`CycleTimer`] picks a [`CounterSource`] once, at construction, and from
//! then on every read is infallible. The timer is a small `Copy` value with no
//! interior state, so each thread can hold its own.
//!
//! ```no_run
//! use cycle_timer::CycleTimer;
//!
//! let timer = CycleTimer::new()?;
//! let start = timer.now();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! let end = timer.now();
//! println!("{} ", timer.elapsed(start, end).cycles);
//! # Ok::<(), cycle_common::TimingError>(())
//! ```

use crate::affinity::current_location;
use crate::counter::{self, Capabilities};
use cycle_common::config::TimerConfig;
use cycle_common::error::{TimingError, TimingResult};
use cycle_common::reading::{
    self, CoreLocation, CounterSource, CycleReading, Elapsed, TaggedReading,
};
use static_assertions::assert_impl_all;
use std::sync::atomic::{compiler_fence, Ordering};
use tracing::{debug, info, warn};

/// Elapsed-cycle timer bound to one counter source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimer {
    source: CounterSource,
    capabilities: Capabilities,
}

assert_impl_all!(CycleTimer: Copy, Send, Sync);
assert_impl_all!(CycleReading: Copy, Send, Sync);

impl CycleTimer {
    /// Create a timer on the best counter this host offers.
    ///
    /// # Errors
    ///
    /// Returns [`TimingError::UnsupportedPlatform`] if neither a cycle counter
    /// nor a monotonic clock is available.
    pub fn new() -> TimingResult<Self> {
        Self::from_capabilities(None, Capabilities::detect())
    }

    /// Create a timer on an explicitly chosen counter.
    ///
    /// # Errors
    ///
    /// Returns [`TimingError::UnsupportedPlatform`] if `source` is not
    /// available on this host.
    pub fn with_source(source: CounterSource) -> TimingResult<Self> {
        Self::from_capabilities(Some(source), Capabilities::detect())
    }

    /// Create a timer from configuration.
    ///
    /// With `allow_fallback`, an unavailable counter is replaced by the
    /// monotonic clock and a warning is logged instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`TimingError::UnsupportedPlatform`] if the requested counter is
    /// unavailable and no substitution was allowed or possible.
    pub fn from_config(config: &TimerConfig) -> TimingResult<Self> {
        Self::from_config_with(config, Capabilities::detect())
    }

    /// Apply `config` against `caps`.
    ///
    /// Automatic selection already considers the monotonic clock, so only an
    /// explicit cycle-counter request is ever substituted.
    pub(crate) fn from_config_with(config: &TimerConfig, caps: Capabilities) -> TimingResult<Self> {
        let requested = config.source.requested();

        match Self::from_capabilities(requested, caps) {
            Err(err)
                if config.allow_fallback
                    && err.is_unsupported_platform()
                    && requested.is_some_and(|source| !source.is_fallback()) =>
            {
                warn!(error = %err, "Requested counter unavailable, substituting monotonic clock");
                Self::from_capabilities(Some(CounterSource::MonotonicFallback), caps)
            }
            result => result,
        }
    }

    /// Validate `requested` (or pick the best source) against `caps`.
    pub(crate) fn from_capabilities(
        requested: Option<CounterSource>,
        caps: Capabilities,
    ) -> TimingResult<Self> {
        let source = match requested {
            Some(source) => {
                caps.check(source)
                    .map_err(|reason| TimingError::UnsupportedPlatform {
                        counter: source,
                        reason,
                    })?;
                source
            }
            None => caps
                .best_source()
                .ok_or_else(|| TimingError::UnsupportedPlatform {
                    counter: CounterSource::MonotonicFallback,
                    reason: "no cycle counter and no monotonic clock".into(),
                })?,
        };

        if !source.is_fallback() && !caps.invariant_tsc {
            warn!(
                %source,
                "TSC is not invariant - cycle counts may drift with frequency scaling"
            );
        }

        info!(%source, fallback = source.is_fallback(), "Cycle timer ready");
        Ok(Self {
            source,
            capabilities: caps,
        })
    }

    /// Counter source chosen at construction.
    #[must_use]
    pub fn source(&self) -> CounterSource {
        self.source
    }

    /// Whether readings are nanoseconds from the monotonic clock.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source.is_fallback()
    }

    /// Capabilities detected at construction.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Current counter value, without ordering against surrounding code.
    #[inline]
    #[must_use]
    pub fn now(&self) -> CycleReading {
        self.read(false)
    }

    /// Current counter value, serialized against surrounding instructions.
    #[inline]
    #[must_use]
    pub fn now_strict(&self) -> CycleReading {
        self.read(true)
    }

    /// Read the counter in plain or serialized mode.
    #[inline]
    #[must_use]
    pub fn read(&self, strict: bool) -> CycleReading {
        let ticks = match (self.source, strict) {
            (CounterSource::Rdtsc, false) => counter::rdtsc(),
            (CounterSource::Rdtsc, true) => counter::rdtsc_serialized(),
            (CounterSource::Rdtscp, false) => counter::rdtscp().0,
            (CounterSource::Rdtscp, true) => counter::rdtscp_serialized().0,
            (CounterSource::MonotonicFallback, false) => monotonic_ticks(),
            (CounterSource::MonotonicFallback, true) => {
                compiler_fence(Ordering::SeqCst);
                let ticks = monotonic_ticks();
                compiler_fence(Ordering::SeqCst);
                ticks
            }
        };
        CycleReading::new(ticks, self.source)
    }

    /// Serialized reading tagged with the core it was taken on.
    ///
    /// With RDTSCP on Linux the core comes from `IA32_TSC_AUX` in the same
    /// instruction; otherwise `getcpu` is queried just before the read.
    #[must_use]
    pub fn now_tagged(&self) -> TaggedReading {
        if self.source == CounterSource::Rdtscp && cfg!(target_os = "linux") {
            let (ticks, aux) = counter::rdtscp_serialized();
            return TaggedReading {
                reading: CycleReading::new(ticks, self.source),
                location: Some(CoreLocation::from_tsc_aux(aux)),
            };
        }

        let location = current_location();
        TaggedReading {
            reading: self.now_strict(),
            location,
        }
    }

    /// `end - start`, saturating at zero with the anomaly flag set.
    #[must_use]
    pub fn elapsed(&self, start: CycleReading, end: CycleReading) -> Elapsed {
        reading::elapsed(start, end)
    }

    /// Like [`elapsed`](Self::elapsed), also flagging core migration.
    #[must_use]
    pub fn elapsed_tagged(&self, start: TaggedReading, end: TaggedReading) -> Elapsed {
        reading::elapsed_tagged(start, end)
    }

    /// Span from `start` to a fresh plain reading.
    #[must_use]
    pub fn elapsed_since(&self, start: CycleReading) -> Elapsed {
        reading::elapsed(start, self.now())
    }

    /// Run `f` between two plain reads.
    pub fn measure<R>(&self, f: impl FnOnce() -> R) -> (R, Elapsed) {
        self.measure_with(false, f)
    }

    /// Run `f` between two serialized reads.
    pub fn measure_strict<R>(&self, f: impl FnOnce() -> R) -> (R, Elapsed) {
        self.measure_with(true, f)
    }

    fn measure_with<R>(&self, strict: bool, f: impl FnOnce() -> R) -> (R, Elapsed) {
        let start = self.read(strict);
        let result = f();
        let end = self.read(strict);
        let span = reading::elapsed(start, end);
        debug!(cycles = span.cycles.get(), strict, "Measured span");
        (result, span)
    }
}

// The clock answered a probe at construction, so a failure here would mean
// the kernel withdrew CLOCK_MONOTONIC mid-run; report zero rather than panic.
#[inline]
fn monotonic_ticks() -> u64 {
    counter::monotonic_nanos().unwrap_or_default()
}
