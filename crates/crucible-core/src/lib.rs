//! Host performance benchmarking engine
//!
//! This crate provides the core functionality for:
//! - Expanding subsystem and test mode selections into timed run plans
//! - Driving CPU, memory, storage, network and I/O load on worker threads
//! - Sampling subsystem metrics on a fixed cadence while load runs
//! - Recording session events and metric rows to rotating log files
//! - Prometheus metrics and structured run events

pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod orchestrator;
pub mod recorder;
pub mod scheduler;
pub mod subsystem;
pub mod worker;

pub use config::BenchConfig;
pub use error::{ConfigurationError, CrucibleError, RecorderError};
pub use models::*;
pub use observability::{BenchMetrics, RunLogger};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorState, PlanOutcome, RunReport,
};
pub use recorder::{BufferingMode, Recorder, RecorderConfig};
pub use scheduler::ProfileScheduler;
pub use subsystem::{host_subsystems, HostPaths, Subsystem};
