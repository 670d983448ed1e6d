use crate::reading::CounterSource;
use thiserror::Error;

/// Timing error types covering platform capability, configuration, and placement failures.
///
/// Measurement anomalies are deliberately absent: they are reported on
/// [`Elapsed`](crate::reading::Elapsed) and never abort a measurement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// The requested counter source is not available on this host.
    ///
    /// Raised once, when a timer is constructed.
    #[error("unsupported platform: {counter} unavailable ({reason})")]
    UnsupportedPlatform {
        /// Counter source that was requested.
        counter: CounterSource,
        /// Why the source cannot be used.
        reason: String,
    },

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pinning the calling thread to a CPU failed.
    #[error("affinity error: {0}")]
    Affinity(String),

    /// Counter frequency could not be determined.
    #[error("calibration error: {0}")]
    Calibration(String),
}

impl TimingError {
    /// Whether this error means the caller should pick a different counter source.
    #[must_use]
    pub fn is_unsupported_platform(&self) -> bool {
        matches!(self, TimingError::UnsupportedPlatform { .. })
    }
}

/// Convenience type alias for timing operations.
pub type TimingResult<T> = Result<T, TimingError>;
