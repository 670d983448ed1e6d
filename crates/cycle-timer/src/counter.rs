//! Counter capability detection and raw counter reads.
//!
//! Provides the platform-specific half of the timer:
//! - CPUID probing for TSC, RDTSCP and invariant TSC support
//! - Plain and serialized RDTSC / RDTSCP reads
//! - The monotonic clock used when no cycle counter exists

use cycle_common::reading::CounterSource;
use serde::Serialize;
use tracing::debug;

/// Counter sources available on the current host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// `RDTSC` is available.
    pub tsc: bool,
    /// `RDTSCP` is available.
    pub rdtscp: bool,
    /// The TSC ticks at a constant rate across P-/C-states.
    pub invariant_tsc: bool,
    /// The OS monotonic clock answered a probe read.
    pub monotonic_clock: bool,
}

impl Capabilities {
    /// Probe the current host.
    #[must_use]
    pub fn detect() -> Self {
        let (tsc, rdtscp, invariant_tsc) = cpuid_flags();
        let caps = Self {
            tsc,
            rdtscp,
            invariant_tsc,
            monotonic_clock: monotonic_nanos().is_some(),
        };
        debug!(?caps, "Counter capabilities detected");
        caps
    }

    /// Best source available: RDTSCP, then RDTSC, then the monotonic clock.
    #[must_use]
    pub fn best_source(&self) -> Option<CounterSource> {
        if self.rdtscp {
            Some(CounterSource::Rdtscp)
        } else if self.tsc {
            Some(CounterSource::Rdtsc)
        } else if self.monotonic_clock {
            Some(CounterSource::MonotonicFallback)
        } else {
            None
        }
    }

    /// Check whether `source` can be read on this host.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when it cannot.
    pub fn check(&self, source: CounterSource) -> Result<(), String> {
        match source {
            CounterSource::Rdtsc if !self.tsc => Err(no_tsc_reason().into()),
            CounterSource::Rdtscp if !self.rdtscp => {
                Err("CPUID reports no RDTSCP instruction".into())
            }
            CounterSource::MonotonicFallback if !self.monotonic_clock => {
                Err("no monotonic clock on this platform".into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn no_tsc_reason() -> &'static str {
    "CPUID reports no time-stamp counter"
}

#[cfg(not(target_arch = "x86_64"))]
fn no_tsc_reason() -> &'static str {
    "time-stamp counter requires an x86_64 target"
}

/// Returns `(tsc, rdtscp, invariant_tsc)`.
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn cpuid_flags() -> (bool, bool, bool) {
    use core::arch::x86_64::__cpuid;

    // SAFETY: CPUID exists on every x86_64 processor; leaves are range-checked
    // against the reported maxima before being queried.
    unsafe {
        let max_basic = __cpuid(0).eax;
        let tsc = max_basic >= 1 && (__cpuid(1).edx & (1 << 4)) != 0;

        let max_extended = __cpuid(0x8000_0000).eax;
        let rdtscp = max_extended >= 0x8000_0001 && (__cpuid(0x8000_0001).edx & (1 << 27)) != 0;
        let invariant_tsc =
            max_extended >= 0x8000_0007 && (__cpuid(0x8000_0007).edx & (1 << 8)) != 0;

        (tsc, rdtscp, invariant_tsc)
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn cpuid_flags() -> (bool, bool, bool) {
    (false, false, false)
}

/// `RDTSC` with no ordering guarantees.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub(crate) fn rdtsc() -> u64 {
    // SAFETY: only reached when CPUID reported TSC support.
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// `LFENCE; RDTSC; LFENCE`: earlier instructions retire before the read and
/// later ones do not start until it completes.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[allow(unused_unsafe)]
pub(crate) fn rdtsc_serialized() -> u64 {
    use core::arch::x86_64::{_mm_lfence, _rdtsc};

    // SAFETY: LFENCE is part of SSE2, which is baseline on x86_64.
    unsafe {
        _mm_lfence();
        let ticks = _rdtsc();
        _mm_lfence();
        ticks
    }
}

/// `RDTSCP`, returning the counter and `IA32_TSC_AUX`.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub(crate) fn rdtscp() -> (u64, u32) {
    let mut aux = 0u32;
    // SAFETY: only reached when CPUID reported RDTSCP support.
    let ticks = unsafe { core::arch::x86_64::__rdtscp(&mut aux) };
    (ticks, aux)
}

/// `RDTSCP; LFENCE`: RDTSCP already waits for earlier instructions, the fence
/// keeps later ones from starting early.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[allow(unused_unsafe)]
pub(crate) fn rdtscp_serialized() -> (u64, u32) {
    let reading = rdtscp();
    // SAFETY: LFENCE is part of SSE2, which is baseline on x86_64.
    unsafe { core::arch::x86_64::_mm_lfence() };
    reading
}

// Without a TSC the timer never selects these sources; capability detection
// reports both as missing, so these bodies are never reached.
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub(crate) fn rdtsc() -> u64 {
    0
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub(crate) fn rdtsc_serialized() -> u64 {
    0
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub(crate) fn rdtscp() -> (u64, u32) {
    (0, 0)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub(crate) fn rdtscp_serialized() -> (u64, u32) {
    (0, 0)
}

/// Read the monotonic clock in nanoseconds.
///
/// `CLOCK_MONOTONIC_RAW` where it exists, since it is not slewed by NTP.
#[cfg(unix)]
pub(crate) fn monotonic_nanos() -> Option<u64> {
    use nix::time::{clock_gettime, ClockId};

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let clock = ClockId::CLOCK_MONOTONIC_RAW;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let clock = ClockId::CLOCK_MONOTONIC;

    let ts = clock_gettime(clock).ok()?;
    let secs = u64::try_from(ts.tv_sec()).ok()?;
    let nanos = u64::try_from(ts.tv_nsec()).ok()?;
    secs.checked_mul(1_000_000_000)?.checked_add(nanos)
}

#[cfg(not(unix))]
pub(crate) fn monotonic_nanos() -> Option<u64> {
    None
}
