//! Benchmark run configuration
//!
//! [`BenchConfig`] is the finished configuration the orchestrator consumes.
//! Layering of files, environment and flags happens in the binary.

use crate::error::ConfigurationError;
use crate::models::{parse_components, SampleCadence, Severity, SubsystemKind, TestMode};
use crate::recorder::{BufferingMode, RecorderConfig};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Benchmark run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Subsystems to benchmark, in execution order
    #[serde(default = "default_components", deserialize_with = "deserialize_components")]
    pub components: Vec<SubsystemKind>,

    /// Requested test mode
    #[serde(default)]
    pub mode: TestMode,

    /// Duration of each sustained run in seconds
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Interval between metric snapshots in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Load intensity percentage, full load when absent
    #[serde(default)]
    pub intensity: Option<u8>,

    /// Length of the observation-only diagnostics phase in seconds (0 skips it)
    #[serde(default = "default_diagnostics")]
    pub diagnostics_secs: u64,

    /// Directory for `session.log` and `metrics.csv`
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Minimum severity written to the session log
    #[serde(default)]
    pub log_level: Severity,

    /// Rotate the logs once a file exceeds this many MiB (0 disables)
    #[serde(default = "default_rotate_mb")]
    pub rotate_mb: u64,

    #[serde(default)]
    pub buffering: BufferingMode,

    /// Scratch directory for storage and I/O load files, system temp dir when absent
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_components() -> Vec<SubsystemKind> {
    SubsystemKind::ALL.to_vec()
}

/// Accepts `"cpu,io"`, `"all"` or `["cpu", "io"]`
fn deserialize_components<'de, D>(deserializer: D) -> Result<Vec<SubsystemKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ComponentList {
        Joined(String),
        Names(Vec<String>),
    }

    let list = match ComponentList::deserialize(deserializer)? {
        ComponentList::Joined(list) => list,
        ComponentList::Names(names) => names.join(","),
    };
    parse_components(&list).map_err(serde::de::Error::custom)
}

fn default_duration() -> u64 {
    300
}

fn default_sample_interval() -> u64 {
    5
}

fn default_diagnostics() -> u64 {
    60
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_rotate_mb() -> u64 {
    10
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            mode: TestMode::default(),
            duration_secs: default_duration(),
            sample_interval_secs: default_sample_interval(),
            intensity: None,
            diagnostics_secs: default_diagnostics(),
            log_dir: default_log_dir(),
            log_level: Severity::default(),
            rotate_mb: default_rotate_mb(),
            buffering: BufferingMode::default(),
            scratch_dir: None,
        }
    }
}

impl BenchConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn diagnostics(&self) -> Duration {
        Duration::from_secs(self.diagnostics_secs)
    }

    /// Check every field that can make a run plan invalid
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.components.is_empty() {
            return Err(ConfigurationError::NoComponents);
        }
        if self.duration_secs == 0 {
            return Err(ConfigurationError::ZeroDuration);
        }
        if let Some(intensity) = self.intensity {
            if intensity > 100 {
                return Err(ConfigurationError::IntensityOutOfRange(intensity));
            }
        }
        self.cadence().map(|_| ())
    }

    /// Sampling cadence, validated against the sustained run duration
    pub fn cadence(&self) -> Result<SampleCadence, ConfigurationError> {
        SampleCadence::new(self.sample_interval(), self.duration())
    }

    /// Recorder settings derived from this configuration
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            directory: self.log_dir.clone(),
            min_severity: self.log_level,
            rotation_threshold_bytes: self.rotate_mb.saturating_mul(1024 * 1024),
            buffering: self.buffering,
        }
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let components: Vec<&str> = self.components.iter().map(|c| c.as_str()).collect();
        write!(
            f,
            "components={} mode={} duration={}s sample_interval={}s diagnostics={}s",
            components.join(","),
            self.mode,
            self.duration_secs,
            self.sample_interval_secs,
            self.diagnostics_secs
        )?;
        match self.intensity {
            Some(intensity) => write!(f, " intensity={}%", intensity),
            None => f.write_str(" intensity=full"),
        }
    }
}
