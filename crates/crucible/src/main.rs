//! Crucible - host performance benchmarking harness
//!
//! Runs timed baseline, load, stress and spike profiles against the
//! selected subsystems while sampling their metrics, and records the
//! session to rotating log files in the log directory.

use anyhow::{Context, Result};
use clap::Parser;
use crucible_core::{host_subsystems, BenchMetrics, HostPaths, Orchestrator, Severity, TestMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Run summary written next to the session log
const REPORT_FILE: &str = "report.json";

/// Prometheus textfile written next to the session log
const METRICS_TEXTFILE: &str = "crucible.prom";

/// Exit status after an interrupt, as a shell reports SIGINT
const INTERRUPTED: u8 = 130;

/// Host performance benchmarking harness
#[derive(Parser, Debug)]
#[command(name = "crucible")]
#[command(author, version, about = "Host performance benchmarking harness", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); overridden by CRUCIBLE_* variables and flags
    #[arg(long, short, env = "CRUCIBLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Comma-separated components: cpu, memory, storage, network, io or all
    #[arg(long)]
    pub components: Option<String>,

    /// Test mode: baseline, stress, load, spike or all
    #[arg(long, short)]
    pub mode: Option<TestMode>,

    /// Duration of each sustained run in seconds
    #[arg(long, short)]
    pub duration: Option<u64>,

    /// Seconds between metric samples
    #[arg(long, visible_alias = "interval")]
    pub sample_freq: Option<u64>,

    /// Load intensity in percent (full load when omitted)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub intensity: Option<u8>,

    /// Observation-only diagnostics phase in seconds (0 skips it)
    #[arg(long)]
    pub diagnostics: Option<u64>,

    /// Directory for session.log, metrics.csv and the run report
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Minimum session log level: debug, info, warning or error
    #[arg(long)]
    pub log_level: Option<Severity>,

    /// Rotate log files past this size in MB (0 disables rotation)
    #[arg(long)]
    pub rotate_mb: Option<u64>,

    /// Flush every session log line immediately
    #[arg(long)]
    pub unbuffered: bool,

    /// Directory for storage and I/O scratch files
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Emit process logs as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug process logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let bench = config::load(&cli)?;
    info!(config = %bench, "Starting crucible");

    let mut paths = HostPaths::default();
    if let Some(dir) = &bench.scratch_dir {
        paths = paths.with_scratch_dir(dir);
    }
    let subsystems = host_subsystems(&bench.components, &paths);
    let log_dir = bench.log_dir.clone();

    let mut orchestrator = Orchestrator::builder()
        .config(bench)
        .subsystems(subsystems)
        .host(config::host_name())
        .build();
    let recorder = orchestrator.recorder();

    let report = tokio::select! {
        result = orchestrator.run() => result.context("benchmark run failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down recorder");
            recorder.warning("Benchmark interrupted by signal");
            recorder.shutdown();
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    let report_path = log_dir.join(REPORT_FILE);
    report
        .write_json(&report_path)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    BenchMetrics::new()
        .export_textfile(&log_dir.join(METRICS_TEXTFILE))
        .context("failed to export process metrics")?;

    info!(
        passed = report.passed(),
        failed = report.failed(),
        elapsed_secs = report.elapsed_secs,
        report = %report_path.display(),
        "Benchmark finished"
    );

    if report.success {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(failed = report.failed(), "Some run plans failed");
        Ok(ExitCode::FAILURE)
    }
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
