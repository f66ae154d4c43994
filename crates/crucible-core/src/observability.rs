//! Observability infrastructure for benchmark runs
//!
//! Provides:
//! - Prometheus metrics (samples, workers, plan outcomes and durations, rotations)
//! - Textfile export of the registry for node-exporter style collection
//! - Structured run events with tracing

use crate::error::CrucibleError;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for plan durations (in seconds)
const PLAN_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Global metrics instance (registered once, `None` if registration failed)
static GLOBAL_METRICS: OnceLock<Option<BenchMetricsInner>> = OnceLock::new();

struct BenchMetricsInner {
    samples_recorded: IntCounterVec,
    sample_failures: IntCounterVec,
    workers_started: IntCounterVec,
    plans_completed: IntCounterVec,
    plans_failed: IntCounterVec,
    plan_duration_seconds: HistogramVec,
    log_rotations: IntGauge,
}

impl BenchMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            samples_recorded: register_int_counter_vec!(
                "crucible_samples_recorded_total",
                "Metric samples written to the metrics log",
                &["subsystem"]
            )?,

            sample_failures: register_int_counter_vec!(
                "crucible_sample_failures_total",
                "Snapshots that failed to read subsystem metrics",
                &["subsystem"]
            )?,

            workers_started: register_int_counter_vec!(
                "crucible_workers_started_total",
                "Stress workers started",
                &["subsystem"]
            )?,

            plans_completed: register_int_counter_vec!(
                "crucible_plans_completed_total",
                "Run plans that finished successfully",
                &["subsystem", "profile"]
            )?,

            plans_failed: register_int_counter_vec!(
                "crucible_plans_failed_total",
                "Run plans that failed",
                &["subsystem", "profile"]
            )?,

            plan_duration_seconds: register_histogram_vec!(
                "crucible_plan_duration_seconds",
                "Wall time spent executing a run plan",
                &["subsystem", "profile"],
                PLAN_DURATION_BUCKETS.to_vec()
            )?,

            log_rotations: register_int_gauge!(
                "crucible_log_rotations",
                "Log rotations performed by the recorder in this run"
            )?,
        })
    }
}

/// Benchmark metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct BenchMetrics {
    _private: (),
}

impl Default for BenchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match BenchMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register benchmark metrics, continuing without them");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&BenchMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn inc_samples_recorded(&self, subsystem: &str, count: u64) {
        if let Some(inner) = self.inner() {
            inner
                .samples_recorded
                .with_label_values(&[subsystem])
                .inc_by(count);
        }
    }

    pub fn inc_sample_failures(&self, subsystem: &str) {
        if let Some(inner) = self.inner() {
            inner.sample_failures.with_label_values(&[subsystem]).inc();
        }
    }

    pub fn inc_workers_started(&self, subsystem: &str, count: u64) {
        if let Some(inner) = self.inner() {
            inner
                .workers_started
                .with_label_values(&[subsystem])
                .inc_by(count);
        }
    }

    /// Record a finished plan with its outcome and wall time
    pub fn observe_plan(&self, subsystem: &str, profile: &str, success: bool, duration_secs: f64) {
        if let Some(inner) = self.inner() {
            let labels = [subsystem, profile];
            if success {
                inner.plans_completed.with_label_values(&labels).inc();
            } else {
                inner.plans_failed.with_label_values(&labels).inc();
            }
            inner
                .plan_duration_seconds
                .with_label_values(&labels)
                .observe(duration_secs);
        }
    }

    pub fn set_log_rotations(&self, rotations: u64) {
        if let Some(inner) = self.inner() {
            inner
                .log_rotations
                .set(i64::try_from(rotations).unwrap_or(i64::MAX));
        }
    }

    /// Write every registered metric in text exposition format to `path`
    pub fn export_textfile(&self, path: &Path) -> Result<(), CrucibleError> {
        let report_err = |source: io::Error| CrucibleError::Report {
            path: path.to_path_buf(),
            source,
        };

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| report_err(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        fs::write(path, buffer).map_err(report_err)
    }
}

/// Structured logger for run lifecycle events
#[derive(Clone)]
pub struct RunLogger {
    host: String,
}

impl RunLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Log run startup
    pub fn log_run_started(&self, plans: usize, estimated_secs: u64) {
        info!(
            event = "run_started",
            host = %self.host,
            plans = plans,
            estimated_secs = estimated_secs,
            "Benchmark run started"
        );
    }

    /// Log the outcome of one run plan
    pub fn log_plan_finished(
        &self,
        subsystem: &str,
        profile: &str,
        workers: usize,
        samples: u64,
        elapsed_secs: f64,
        error: Option<&str>,
    ) {
        match error {
            None => info!(
                event = "plan_finished",
                host = %self.host,
                subsystem = %subsystem,
                profile = %profile,
                workers = workers,
                samples = samples,
                elapsed_secs = elapsed_secs,
                "Run plan completed"
            ),
            Some(error) => warn!(
                event = "plan_failed",
                host = %self.host,
                subsystem = %subsystem,
                profile = %profile,
                workers = workers,
                samples = samples,
                elapsed_secs = elapsed_secs,
                error = %error,
                "Run plan failed"
            ),
        }
    }

    /// Log run completion
    pub fn log_run_finished(&self, passed: usize, failed: usize, elapsed_secs: f64) {
        if failed == 0 {
            info!(
                event = "run_finished",
                host = %self.host,
                passed = passed,
                failed = failed,
                elapsed_secs = elapsed_secs,
                "Benchmark run finished"
            );
        } else {
            warn!(
                event = "run_finished",
                host = %self.host,
                passed = passed,
                failed = failed,
                elapsed_secs = elapsed_secs,
                "Benchmark run finished with failures"
            );
        }
    }
}
