//! Thread placement utilities.
//!
//! Cycle-counter deltas are only comparable when both readings come from the
//! same core. These helpers let a caller find out where it is running and pin
//! itself before measuring:
//! - `getcpu` to report the current CPU and NUMA node
//! - CPU affinity to keep the measuring thread on one core
//!
//! [`CycleTimer`](crate::timer::CycleTimer) never pins on its own.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use cycle_common::config::CpuAffinity;
use cycle_common::error::{TimingError, TimingResult};
use cycle_common::reading::CoreLocation;
use tracing::{debug, info, warn};

/// CPU and NUMA node the calling thread is running on right now.
///
/// The answer may be stale as soon as it is returned unless the thread is
/// pinned.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_location() -> Option<CoreLocation> {
    let mut cpu: libc::c_uint = 0;
    let mut node: libc::c_uint = 0;

    // SAFETY: getcpu writes two c_uints through valid pointers; the third
    // (tcache) argument is unused since Linux 2.6.24 and may be null.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_getcpu,
            &mut cpu as *mut libc::c_uint,
            &mut node as *mut libc::c_uint,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    if rc == 0 {
        Some(CoreLocation { cpu, node })
    } else {
        debug!(error = %std::io::Error::last_os_error(), "getcpu failed");
        None
    }
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_location() -> Option<CoreLocation> {
    None
}

/// Pin the calling thread to the CPUs named by `affinity`.
///
/// Returns the CPUs actually applied, or `None` if nothing was pinned.
///
/// # Errors
///
/// Returns [`TimingError::Affinity`] if a CPU index cannot be represented or
/// the kernel rejects the request for a reason other than a nonexistent CPU.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(affinity: &CpuAffinity) -> TimingResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        debug!("No CPU affinity configured");
        return Ok(None);
    }

    debug!(?cpus, "Setting CPU affinity");

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| TimingError::Affinity(format!("invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(?cpus, "Measuring thread pinned");
            Ok(Some(cpus))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set - some CPUs may not exist, thread left unpinned");
            Ok(None)
        }
        Err(e) => Err(TimingError::Affinity(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(affinity: &CpuAffinity) -> TimingResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

/// CPUs the calling thread is currently allowed to run on.
///
/// # Errors
///
/// Returns [`TimingError::Affinity`] if the mask cannot be read.
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> TimingResult<Vec<usize>> {
    use nix::sched::{sched_getaffinity, CpuSet};
    use nix::unistd::Pid;

    let set = sched_getaffinity(Pid::from_raw(0))
        .map_err(|e| TimingError::Affinity(format!("sched_getaffinity failed: {e}")))?;

    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> TimingResult<Vec<usize>> {
    Ok((0..online_cpus()).collect())
}

/// Number of online CPUs.
#[must_use]
pub fn online_cpus() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        usize::try_from(n).unwrap_or(1).max(1)
    }
    #[cfg(not(unix))]
    {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}
