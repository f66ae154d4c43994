//! Durable dual-stream recorder
//!
//! Writes two append-only files under one directory:
//! - `session.log`: `[timestamp] [SEVERITY] message` lines
//! - `metrics.csv`: `timestamp,elapsed_seconds,metric,values` rows
//!
//! Every append runs under a single lock together with the size check that
//! may rotate both files first, so concurrent writers never interleave a
//! partial line and never append to a file that is being archived.

use crate::error::RecorderError;
use crate::models::{MetricSample, SessionEvent, Severity};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};


/// File name of the session stream
pub const SESSION_FILE: &str = "session.log";

/// File name of the metric stream
pub const METRICS_FILE: &str = "metrics.csv";

/// Header line of every metric stream
pub const METRICS_HEADER: &str = "timestamp,elapsed_seconds,metric,values";

/// Layout of the suffix appended to archived files
const ARCHIVE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// When buffered writes reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingMode {
    /// Flush after every write
    Unbuffered,
    /// Flush on error events, explicit flush and shutdown
    #[default]
    Line,
}

impl fmt::Display for BufferingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferingMode::Unbuffered => f.write_str("unbuffered"),
            BufferingMode::Line => f.write_str("line"),
        }
    }
}

impl FromStr for BufferingMode {
    type Err = crate::error::ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unbuffered" | "none" => Ok(BufferingMode::Unbuffered),
            "line" | "buffered" => Ok(BufferingMode::Line),
            other => Err(crate::error::ConfigurationError::UnknownBuffering(
                other.to_string(),
            )),
        }
    }
}

/// Settings for [`Recorder::init`]
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory holding both streams, created if absent
    pub directory: PathBuf,
    /// Events below this severity are dropped
    pub min_severity: Severity,
    /// Rotate once either file grows beyond this many bytes (0 disables)
    pub rotation_threshold_bytes: u64,
    pub buffering: BufferingMode,
}

impl RecorderConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            min_severity: Severity::Info,
            rotation_threshold_bytes: 0,
            buffering: BufferingMode::Line,
        }
    }
}

/// An append-only file with a running byte count
///
/// A closed stream reopens itself on the next write, so a failed reopen
/// during rotation only costs the lines written while the file was
/// unreachable.
struct LogStream {
    path: PathBuf,
    /// First line of every fresh file
    header: Option<&'static str>,
    writer: Option<BufWriter<File>>,
    bytes: u64,
}

impl LogStream {
    fn open(path: PathBuf, header: Option<&'static str>) -> Result<Self, RecorderError> {
        let mut stream = Self {
            path,
            header,
            writer: None,
            bytes: 0,
        };
        stream.reopen()?;
        Ok(stream)
    }

    /// Open the file for append, writing the header if it is empty
    fn reopen(&mut self) -> Result<(), RecorderError> {
        let open_err = |path: &Path, source| RecorderError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| open_err(&self.path, source))?;
        self.bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));

        if self.bytes == 0 {
            if let Some(header) = self.header {
                self.write_line(header)
                    .map_err(|source| open_err(&self.path, source))?;
            }
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.writer.is_none() {
            self.reopen()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stream is closed"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.bytes += line.len() as u64 + 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.flush()?;
                writer.get_ref().sync_data()
            }
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let result = self.flush();
        self.writer = None;
        result
    }
}

/// Live state of an initialized recorder
struct RecorderState {
    directory: PathBuf,
    min_severity: Severity,
    rotation_threshold: u64,
    buffering: BufferingMode,
    started: Instant,
    session: LogStream,
    metrics: LogStream,
    rotations: u64,
    deferred_error: Option<String>,
}

impl RecorderState {
    fn open(config: &RecorderConfig) -> Result<Self, RecorderError> {
        let directory = config.directory.clone();
        ensure_directory(&directory)?;

        let session = LogStream::open(directory.join(SESSION_FILE), None)?;
        let metrics = LogStream::open(directory.join(METRICS_FILE), Some(METRICS_HEADER))?;

        Ok(Self {
            directory,
            min_severity: config.min_severity,
            rotation_threshold: config.rotation_threshold_bytes,
            buffering: config.buffering,
            started: Instant::now(),
            session,
            metrics,
            rotations: 0,
            deferred_error: None,
        })
    }

    /// Keep the first write failure around for the next `flush()`
    fn note(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            if self.deferred_error.is_none() {
                self.deferred_error = Some(e.to_string());
            }
        }
    }

    fn rotation_due(&self) -> bool {
        self.rotation_threshold > 0
            && (self.session.bytes > self.rotation_threshold
                || self.metrics.bytes > self.rotation_threshold)
    }

    fn rotate_if_needed(&mut self) {
        if self.rotation_due() {
            if let Err(e) = self.rotate() {
                warn!(error = %e, "Automatic log rotation failed");
            }
        }
    }

    fn append_event(&mut self, event: &SessionEvent) {
        let result = self.session.write_line(&event.to_line());
        self.note(result);

        if self.buffering == BufferingMode::Unbuffered || event.severity == Severity::Error {
            let result = self.session.flush();
            self.note(result);
        }
    }

    fn append_sample(&mut self, sample: &MetricSample) {
        let result = self.metrics.write_line(&sample.to_row());
        self.note(result);

        if self.buffering == BufferingMode::Unbuffered {
            let result = self.metrics.flush();
            self.note(result);
        }
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        let session = self.session.flush();
        let metrics = self.metrics.flush();
        session.and(metrics).map_err(RecorderError::Flush)?;

        match self.deferred_error.take() {
            Some(message) => Err(RecorderError::Deferred(message)),
            None => Ok(()),
        }
    }

    fn rotate(&mut self) -> Result<(), RecorderError> {
        let stamp = Local::now().format(ARCHIVE_STAMP_FORMAT).to_string();

        let closed = self.session.close().and(self.metrics.close());
        self.note(closed);

        let session_archive = archive_path(&self.directory, "session", &stamp, "log");
        let metrics_archive = archive_path(&self.directory, "metrics", &stamp, "csv");

        let renamed = archive(&self.session.path, &session_archive)
            .and_then(|_| archive(&self.metrics.path, &metrics_archive));

        // Both streams are reopened even when archiving failed so that
        // logging keeps working against the current files. A stream that
        // cannot be reopened retries on its next write.
        let reopened = self.session.reopen().and(self.metrics.reopen());
        reopened?;
        renamed?;

        self.rotations += 1;
        debug!(
            session_archive = %session_archive.display(),
            metrics_archive = %metrics_archive.display(),
            "Log files rotated"
        );
        if Severity::Info >= self.min_severity {
            self.append_event(&SessionEvent::new(Severity::Info, "Log files rotated"));
        }
        Ok(())
    }
}

/// Process-owned recorder shared by handle with every component that logs
///
/// A recorder starts uninitialized. Logging calls on an uninitialized
/// recorder are silently dropped, so components never need to check.
pub struct Recorder {
    state: Mutex<Option<RecorderState>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    /// Create an uninitialized recorder
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Create and initialize a recorder in one step
    pub fn open(config: &RecorderConfig) -> Result<Self, RecorderError> {
        let recorder = Self::new();
        recorder.init(config)?;
        Ok(recorder)
    }

    fn lock(&self) -> MutexGuard<'_, Option<RecorderState>> {
        // A panic while holding the lock leaves the streams usable; the
        // worst case is one partially buffered line.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open both streams under `config.directory`
    ///
    /// Fails without side effects if the recorder is already initialized.
    pub fn init(&self, config: &RecorderConfig) -> Result<(), RecorderError> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Err(RecorderError::AlreadyInitialized);
        }

        let mut state = RecorderState::open(config)?;
        let banner = format!(
            "Logging initialized (level: {}, directory: {}, rotation: {} bytes, buffering: {})",
            config.min_severity,
            state.directory.display(),
            config.rotation_threshold_bytes,
            config.buffering
        );
        info!(directory = %state.directory.display(), "Recorder initialized");
        if Severity::Info >= state.min_severity {
            state.append_event(&SessionEvent::new(Severity::Info, banner));
        }

        *guard = Some(state);
        Ok(())
    }

    /// Whether the recorder currently holds open streams
    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Directory of the live streams
    pub fn directory(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|s| s.directory.clone())
    }

    /// Number of rotations since initialization
    pub fn rotation_count(&self) -> u64 {
        self.lock().as_ref().map(|s| s.rotations).unwrap_or(0)
    }

    /// Change the minimum severity written to the session stream
    pub fn set_min_severity(&self, severity: Severity) {
        let mut guard = self.lock();
        if let Some(state) = guard.as_mut() {
            let message = format!(
                "Changing log level from {} to {}",
                state.min_severity, severity
            );
            if Severity::Info >= state.min_severity {
                state.rotate_if_needed();
                state.append_event(&SessionEvent::new(Severity::Info, message));
            }
            state.min_severity = severity;
        }
    }

    /// Append a session event
    ///
    /// Every event is mirrored to `tracing`; only events at or above the
    /// minimum severity reach the session file. Write errors are kept for
    /// the next [`Recorder::flush`].
    pub fn log_event(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        mirror(severity, &message);

        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };
        if severity < state.min_severity {
            return;
        }

        state.rotate_if_needed();
        // Stamped under the lock so timestamps follow file order
        state.append_event(&SessionEvent::new(severity, message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log_event(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log_event(Severity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log_event(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log_event(Severity::Error, message);
    }

    /// Append a metric row, regardless of the minimum severity
    pub fn log_metric<S: AsRef<str>>(&self, name: &str, values: &[S]) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };

        state.rotate_if_needed();
        let sample = MetricSample {
            timestamp: Local::now(),
            elapsed_secs: state.started.elapsed().as_secs_f64(),
            name: name.to_string(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        };
        state.append_sample(&sample);
    }

    /// Force both streams to durable storage
    ///
    /// Also reports the first write failure swallowed since the last flush.
    pub fn flush(&self) -> Result<(), RecorderError> {
        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(RecorderError::NotInitialized)?;
        state.flush()
    }

    /// Archive both files with a timestamp suffix and start fresh ones
    pub fn rotate(&self) -> Result<(), RecorderError> {
        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(RecorderError::NotInitialized)?;
        state.rotate()
    }

    /// Flush and close both streams; further calls are no-ops
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        let Some(mut state) = guard.take() else {
            return;
        };

        if Severity::Info >= state.min_severity {
            state.append_event(&SessionEvent::new(
                Severity::Info,
                "Logging system shutting down",
            ));
        }
        if let Err(e) = state.flush() {
            error!(error = %e, "Failed to flush log streams during shutdown");
        }
        let closed = state.session.close().and(state.metrics.close());
        if let Err(e) = closed {
            error!(error = %e, "Failed to close log streams");
        }
        info!(rotations = state.rotations, "Recorder shut down");
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward a session event to the process log
fn mirror(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => debug!(target: "crucible::session", "{}", message),
        Severity::Info => info!(target: "crucible::session", "{}", message),
        Severity::Warning => warn!(target: "crucible::session", "{}", message),
        Severity::Error => error!(target: "crucible::session", "{}", message),
    }
}

fn ensure_directory(path: &Path) -> Result<(), RecorderError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RecorderError::NotADirectory(path.to_path_buf())),
        Err(_) => fs::create_dir_all(path).map_err(|source| RecorderError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Archive name `<stem>_<stamp>.<ext>`, disambiguated when several
/// rotations land within the same second
fn archive_path(directory: &Path, stem: &str, stamp: &str, ext: &str) -> PathBuf {
    let candidate = directory.join(format!("{}_{}.{}", stem, stamp, ext));
    if !candidate.exists() {
        return candidate;
    }

    (1..)
        .map(|n| directory.join(format!("{}_{}_{}.{}", stem, stamp, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Rename `from` to `to`, treating a missing source as success
fn archive(from: &Path, to: &Path) -> Result<(), RecorderError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RecorderError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        }),
    }
}
