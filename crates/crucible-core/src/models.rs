//! Core data models for the benchmarking engine

use crate::error::ConfigurationError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Timestamp layout used in both the session and metric streams
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Host subsystem that can be stressed and observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemKind {
    Cpu,
    Memory,
    Storage,
    Network,
    Io,
}

impl SubsystemKind {
    /// Every subsystem, in default execution order
    pub const ALL: [SubsystemKind; 5] = [
        SubsystemKind::Cpu,
        SubsystemKind::Memory,
        SubsystemKind::Storage,
        SubsystemKind::Network,
        SubsystemKind::Io,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemKind::Cpu => "cpu",
            SubsystemKind::Memory => "memory",
            SubsystemKind::Storage => "storage",
            SubsystemKind::Network => "network",
            SubsystemKind::Io => "io",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubsystemKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(SubsystemKind::Cpu),
            "memory" => Ok(SubsystemKind::Memory),
            "storage" => Ok(SubsystemKind::Storage),
            "network" => Ok(SubsystemKind::Network),
            "io" => Ok(SubsystemKind::Io),
            other => Err(ConfigurationError::UnknownComponent(other.to_string())),
        }
    }
}

/// Parse a comma-separated component list such as `cpu, memory` or `all`
///
/// Names are case-insensitive and surrounding whitespace is ignored.
/// Duplicates collapse and the result keeps [`SubsystemKind::ALL`] order.
pub fn parse_components(list: &str) -> Result<Vec<SubsystemKind>, ConfigurationError> {
    let mut selected = Vec::new();

    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if token.eq_ignore_ascii_case("all") {
            return Ok(SubsystemKind::ALL.to_vec());
        }
        let kind: SubsystemKind = token.parse()?;
        if !selected.contains(&kind) {
            selected.push(kind);
        }
    }

    if selected.is_empty() {
        return Err(ConfigurationError::NoComponents);
    }

    selected.sort_by_key(|k| SubsystemKind::ALL.iter().position(|a| a == k));
    Ok(selected)
}

/// Concrete load pattern of a single run plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// No load, observation only
    Baseline,
    /// Every worker the subsystem can usefully run
    Stress,
    /// Half the workers, sustained
    Load,
    /// Every worker for a short fixed burst
    Spike,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Baseline => "baseline",
            Profile::Stress => "stress",
            Profile::Load => "load",
            Profile::Spike => "spike",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test mode requested by the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    Baseline,
    Stress,
    Load,
    Spike,
    /// Every concrete profile in sequence
    #[default]
    All,
}

impl TestMode {
    /// Concrete profiles this mode expands to, in execution order
    pub fn profiles(&self) -> &'static [Profile] {
        match self {
            TestMode::Baseline => &[Profile::Baseline],
            TestMode::Stress => &[Profile::Stress],
            TestMode::Load => &[Profile::Load],
            TestMode::Spike => &[Profile::Spike],
            TestMode::All => &[
                Profile::Baseline,
                Profile::Load,
                Profile::Stress,
                Profile::Spike,
            ],
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestMode::Baseline => "baseline",
            TestMode::Stress => "stress",
            TestMode::Load => "load",
            TestMode::Spike => "spike",
            TestMode::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for TestMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(TestMode::Baseline),
            "stress" => Ok(TestMode::Stress),
            "load" => Ok(TestMode::Load),
            "spike" => Ok(TestMode::Spike),
            "all" => Ok(TestMode::All),
            other => Err(ConfigurationError::UnknownMode(other.to_string())),
        }
    }
}

/// One concrete execution unit: stress one subsystem under one profile
///
/// Plans are immutable once built; the scheduler is the only producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    subsystem: SubsystemKind,
    profile: Profile,
    workers: usize,
    duration: Duration,
    intensity: Option<u8>,
}

impl RunPlan {
    pub fn new(
        subsystem: SubsystemKind,
        profile: Profile,
        workers: usize,
        duration: Duration,
        intensity: Option<u8>,
    ) -> Self {
        Self {
            subsystem,
            profile,
            workers,
            duration,
            intensity,
        }
    }

    pub fn subsystem(&self) -> SubsystemKind {
        self.subsystem
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn intensity(&self) -> Option<u8> {
        self.intensity
    }
}

impl fmt::Display for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} workers, {:.1}s",
            self.subsystem,
            self.profile,
            self.workers,
            self.duration.as_secs_f64()
        )?;
        if let Some(intensity) = self.intensity {
            write!(f, ", {}% intensity", intensity)?;
        }
        f.write_str(")")
    }
}

/// Fixed interval between metric snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCadence {
    interval: Duration,
}

impl SampleCadence {
    /// Build a cadence that is valid for runs of `duration`
    pub fn new(interval: Duration, duration: Duration) -> Result<Self, ConfigurationError> {
        if interval.is_zero() {
            return Err(ConfigurationError::ZeroCadence);
        }
        if interval > duration {
            return Err(ConfigurationError::CadenceExceedsDuration {
                cadence: interval,
                duration,
            });
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Severity of a session event, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(ConfigurationError::UnknownSeverity(other.to_string())),
        }
    }
}

/// A structured line of the session stream
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

impl SessionEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            severity,
            message: message.into(),
        }
    }

    /// Render as `[timestamp] [SEVERITY] message`
    ///
    /// Line breaks in the message are escaped as `\n` and `\r`.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.severity,
            single_line(&self.message)
        )
    }
}

fn single_line(message: &str) -> Cow<'_, str> {
    if !message.contains(|c: char| c == '\n' || c == '\r') {
        return Cow::Borrowed(message);
    }
    Cow::Owned(message.replace('\r', "\\r").replace('\n', "\\n"))
}

/// Commas become `;` and line breaks become spaces
fn csv_field(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| matches!(c, ',' | '\n' | '\r')) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .chars()
            .map(|c| match c {
                ',' => ';',
                '\n' | '\r' => ' ',
                c => c,
            })
            .collect(),
    )
}

/// A row of the metric stream
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub timestamp: DateTime<Local>,
    /// Seconds since the recorder was initialized
    pub elapsed_secs: f64,
    pub name: String,
    pub values: Vec<String>,
}

impl MetricSample {
    /// Render as `timestamp,elapsed,name,values...`
    pub fn to_row(&self) -> String {
        let mut row = format!(
            "{},{:.3},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.elapsed_secs,
            csv_field(&self.name)
        );
        for value in &self.values {
            row.push(',');
            row.push_str(&csv_field(value));
        }
        row
    }
}

/// One metric value captured by a subsystem snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
}

impl Reading {
    pub fn new(name: &'static str, value: f64, unit: &'static str) -> Self {
        Self { name, value, unit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_components_list() {
        let kinds = parse_components(" Memory ,cpu,,memory").unwrap();
        assert_eq!(kinds, vec![SubsystemKind::Cpu, SubsystemKind::Memory]);
    }

    #[test]
    fn test_parse_components_all() {
        let kinds = parse_components("cpu,ALL").unwrap();
        assert_eq!(kinds, SubsystemKind::ALL.to_vec());
    }

    #[test]
    fn test_parse_components_rejects_unknown() {
        let err = parse_components("cpu,gpu").unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownComponent("gpu".to_string()));
        assert_eq!(parse_components(" , ").unwrap_err(), ConfigurationError::NoComponents);
    }

    #[test]
    fn test_test_mode_parsing() {
        assert_eq!("Stress".parse::<TestMode>().unwrap(), TestMode::Stress);
        assert_eq!(" all ".parse::<TestMode>().unwrap(), TestMode::All);
        assert!(matches!(
            "soak".parse::<TestMode>(),
            Err(ConfigurationError::UnknownMode(m)) if m == "soak"
        ));
    }

    #[test]
    fn test_all_mode_profile_order() {
        assert_eq!(
            TestMode::All.profiles(),
            &[Profile::Baseline, Profile::Load, Profile::Stress, Profile::Spike]
        );
    }

    #[test]
    fn test_severity_ordering_and_names() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "WARNING");
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
    }

    #[test]
    fn test_sample_cadence_validation() {
        let d = Duration::from_secs(20);
        assert!(SampleCadence::new(Duration::from_secs(5), d).is_ok());
        assert!(SampleCadence::new(d, d).is_ok());
        assert_eq!(
            SampleCadence::new(Duration::ZERO, d).unwrap_err(),
            ConfigurationError::ZeroCadence
        );
        assert!(matches!(
            SampleCadence::new(Duration::from_secs(21), d),
            Err(ConfigurationError::CadenceExceedsDuration { .. })
        ));
    }

    #[test]
    fn test_event_and_sample_rendering() {
        let event = SessionEvent::new(Severity::Error, "disk full");
        let line = event.to_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [ERROR] disk full"));

        let sample = MetricSample {
            timestamp: Local::now(),
            elapsed_secs: 1.5,
            name: "cpu.usage".to_string(),
            values: vec!["stress".to_string(), "97.25".to_string(), "%".to_string()],
        };
        assert!(sample.to_row().ends_with(",1.500,cpu.usage,stress,97.25,%"));
    }

    #[test]
    fn test_multiline_message_stays_on_one_line() {
        let event = SessionEvent::new(Severity::Warning, "first\nsecond\r\nthird");
        let line = event.to_line();
        assert!(!line.contains('\n') && !line.contains('\r'));
        assert!(line.ends_with("] [WARNING] first\\nsecond\\r\\nthird"));
    }

    #[test]
    fn test_metric_fields_cannot_split_columns() {
        let sample = MetricSample {
            timestamp: Local::now(),
            elapsed_secs: 0.0,
            name: "net.rx,bytes".to_string(),
            values: vec!["load".to_string(), "1,5".to_string(), "B/s\n".to_string()],
        };
        let row = sample.to_row();
        assert!(!row.contains('\n'));
        assert_eq!(row.split(',').count(), 6);
        assert!(row.ends_with(",net.rx;bytes,load,1;5,B/s "));
    }

    #[test]
    fn test_run_plan_display() {
        let plan = RunPlan::new(
            SubsystemKind::Cpu,
            Profile::Load,
            2,
            Duration::from_secs(20),
            Some(80),
        );
        assert_eq!(plan.to_string(), "cpu load (2 workers, 20.0s, 80% intensity)");
    }
}
