//! Configuration structures for the cycle timer and demo.
//!
//! Supports TOML deserialization with defaults matching the classic
//! "time a one-second sleep" smoke test.

use crate::reading::CounterSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Counter selection.
    pub timer: TimerConfig,

    /// Thread placement before measuring.
    pub placement: PlacementConfig,

    /// Measurement loop settings.
    pub measure: MeasureConfig,
}

/// Counter selection and read mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Which counter to use.
    pub source: SourcePreference,

    /// Use serialized reads (`now_strict`).
    pub strict: bool,

    /// Substitute the monotonic clock if the requested counter is unavailable.
    pub allow_fallback: bool,

    /// Sleep window used to estimate the counter frequency.
    #[serde(with = "humantime_serde")]
    pub calibration_window: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            source: SourcePreference::Auto,
            strict: false,
            allow_fallback: true,
            calibration_window: Duration::from_millis(100),
        }
    }
}

/// Requested counter source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourcePreference {
    /// Best available: RDTSCP, then RDTSC, then the monotonic clock.
    #[default]
    Auto,
    /// Force `RDTSC`.
    Rdtsc,
    /// Force `RDTSCP`.
    Rdtscp,
    /// Force the monotonic clock.
    Monotonic,
}

impl SourcePreference {
    /// The explicitly requested source, or `None` for automatic selection.
    #[must_use]
    pub fn requested(self) -> Option<CounterSource> {
        match self {
            SourcePreference::Auto => None,
            SourcePreference::Rdtsc => Some(CounterSource::Rdtsc),
            SourcePreference::Rdtscp => Some(CounterSource::Rdtscp),
            SourcePreference::Monotonic => Some(CounterSource::MonotonicFallback),
        }
    }
}

impl std::str::FromStr for SourcePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SourcePreference::Auto),
            "rdtsc" => Ok(SourcePreference::Rdtsc),
            "rdtscp" => Ok(SourcePreference::Rdtscp),
            "monotonic" => Ok(SourcePreference::Monotonic),
            other => Err(format!(
                "unknown counter source '{other}' (expected auto, rdtsc, rdtscp, or monotonic)"
            )),
        }
    }
}

/// Thread placement configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// CPU(s) to pin the measuring thread to.
    pub cpu_affinity: CpuAffinity,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// CPUs named by this specification.
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            CpuAffinity::None => Vec::new(),
            CpuAffinity::Single(cpu) => vec![*cpu],
            CpuAffinity::Set(cpus) => cpus.clone(),
        }
    }
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_str("none"),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("\"none\", a CPU index, or an array of CPU indices")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CpuAffinity::None)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                if value.eq_ignore_ascii_case("none") {
                    Ok(CpuAffinity::None)
                } else {
                    Err(de::Error::invalid_value(de::Unexpected::Str(value), &self))
                }
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index out of range"))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

/// Measurement loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    /// Span timed by each sample.
    #[serde(with = "humantime_serde")]
    pub sleep: Duration,

    /// Number of samples to take.
    pub samples: usize,

    /// Size of the statistics ring buffer.
    pub histogram_size: usize,

    /// Percentiles reported in the summary.
    pub percentiles: Vec<f64>,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            sleep: Duration::from_secs(1),
            samples: 1,
            histogram_size: 1024,
            percentiles: vec![50.0, 90.0, 99.0],
        }
    }
}

impl TimingConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.measure.samples == 0 {
            return Err(ConfigError::Invalid("measure.samples must be at least 1".into()));
        }
        if self.measure.histogram_size == 0 {
            return Err(ConfigError::Invalid(
                "measure.histogram_size must be at least 1".into(),
            ));
        }
        if let Some(p) = self
            .measure
            .percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(ConfigError::Invalid(format!(
                "percentile {p} outside 0..=100"
            )));
        }
        if matches!(&self.placement.cpu_affinity, CpuAffinity::Set(cpus) if cpus.is_empty()) {
            return Err(ConfigError::Invalid(
                "placement.cpu_affinity set must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed values violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
