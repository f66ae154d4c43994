//! Error types for the benchmarking engine
//!
//! Failures fall into four families that are handled differently:
//! - Configuration errors are fatal and raised before any run plan executes
//! - Recorder errors are fatal during initialization and swallowed per call
//! - Worker start errors roll back the partially started pool for one plan
//! - Sample errors are logged and the sampling loop carries on

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error returned by the orchestrator
#[derive(Error, Debug)]
pub enum CrucibleError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("diagnostics failed for {0}")]
    DiagnosticsFailed(String),

    #[error("failed to write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid plan or run parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown test mode '{0}' (expected baseline, stress, load, spike or all)")]
    UnknownMode(String),

    #[error("unknown component '{0}' (expected cpu, memory, storage, network, io or all)")]
    UnknownComponent(String),

    #[error("unknown log level '{0}' (expected debug, info, warning or error)")]
    UnknownSeverity(String),

    #[error("unknown buffering mode '{0}' (expected unbuffered or line)")]
    UnknownBuffering(String),

    #[error("no components selected")]
    NoComponents,

    #[error("no subsystem registered for component '{0}'")]
    MissingSubsystem(String),

    #[error("test duration must be greater than zero")]
    ZeroDuration,

    #[error("sampling interval must be greater than zero")]
    ZeroCadence,

    #[error("sampling interval {cadence:?} cannot be greater than test duration {duration:?}")]
    CadenceExceedsDuration { cadence: Duration, duration: Duration },

    #[error("intensity {0} is outside 0-100 percent")]
    IntensityOutOfRange(u8),
}

/// Failures of the dual-stream recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recorder is already initialized")]
    AlreadyInitialized,

    #[error("recorder is not initialized")]
    NotInitialized,

    #[error("log path {0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {path} for append: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to archive {from} as {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to flush log streams: {0}")]
    Flush(#[source] io::Error),

    #[error("an earlier write failed: {0}")]
    Deferred(String),
}

/// A stress worker thread could not be spawned
#[derive(Error, Debug)]
#[error("failed to start worker {index} of {requested} ({rolled_back} rolled back): {source}")]
pub struct WorkerStartError {
    /// Zero-based index of the worker that failed to start
    pub index: usize,
    /// Number of workers the plan asked for
    pub requested: usize,
    /// Number of already started workers that were cancelled and joined
    pub rolled_back: usize,
    #[source]
    pub source: io::Error,
}

/// Failure of a worker pool run
#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Start(#[from] WorkerStartError),

    #[error("{failed} of {total} workers failed: {first}")]
    Workers {
        failed: usize,
        total: usize,
        first: String,
    },
}

/// Failure raised by a load-generation unit
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("load setup failed: {0}")]
    Setup(String),
}

/// A single metric snapshot could not be taken
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("metric source unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a sampling monitor run
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("all {ticks} snapshots failed, last error: {last}")]
    NoSamples { ticks: u64, last: String },

    #[error("monitor task aborted: {0}")]
    Aborted(String),
}
