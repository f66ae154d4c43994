//! Sampling monitor
//!
//! Snapshots one subsystem on a fixed schedule while its workers run. The
//! schedule is seeded once at start and advanced by exactly one cadence per
//! tick, so slow snapshots never push later ticks back. The monitor stops
//! when the plan duration has elapsed, independent of the worker pool.

mod delta;

pub use delta::{rate, DeltaTracker};

use crate::error::{MonitorError, SampleError};
use crate::models::{Reading, RunPlan, SampleCadence};
use crate::observability::BenchMetrics;
use crate::recorder::Recorder;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Synchronous source of subsystem metrics
pub trait Sampler: Send {
    /// Capture the current value of every metric the subsystem exposes
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError>;
}

/// Counts from one monitor run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub ticks: u64,
    /// Metric rows written
    pub samples: u64,
    /// Ticks whose snapshot failed
    pub failures: u64,
}

#[derive(Clone)]
pub struct SamplingMonitor {
    recorder: Arc<Recorder>,
    metrics: BenchMetrics,
}

impl SamplingMonitor {
    pub fn new(recorder: Arc<Recorder>, metrics: BenchMetrics) -> Self {
        Self { recorder, metrics }
    }

    /// Sample every `cadence` until `plan.duration()` has elapsed
    ///
    /// Emits floor(duration / cadence) ticks. A failed snapshot is logged as
    /// a warning and sampling continues; the run only fails when every tick
    /// failed.
    pub async fn run(
        &self,
        plan: &RunPlan,
        cadence: SampleCadence,
        sampler: &mut dyn Sampler,
    ) -> Result<MonitorReport, MonitorError> {
        let subsystem = plan.subsystem();
        let profile = plan.profile();
        let interval = cadence.interval();
        let start = Instant::now();
        let end = start + plan.duration();

        debug!(
            subsystem = %subsystem,
            profile = %profile,
            interval_secs = interval.as_secs_f64(),
            "Sampling monitor started"
        );

        let mut report = MonitorReport::default();
        let mut last_error = None;
        let mut due = start + interval;

        while due <= end {
            sleep_until(due).await;
            report.ticks += 1;

            match sampler.snapshot() {
                Ok(readings) => {
                    for reading in &readings {
                        let name = format!("{}.{}", subsystem, reading.name);
                        self.recorder.log_metric(
                            &name,
                            &[
                                profile.as_str().to_string(),
                                format!("{:.2}", reading.value),
                                reading.unit.to_string(),
                            ],
                        );
                    }
                    report.samples += readings.len() as u64;
                    self.metrics
                        .inc_samples_recorded(subsystem.as_str(), readings.len() as u64);
                }
                Err(e) => {
                    report.failures += 1;
                    self.metrics.inc_sample_failures(subsystem.as_str());
                    self.recorder.warning(format!(
                        "Failed to sample {} metrics during {} run: {}",
                        subsystem, profile, e
                    ));
                    last_error = Some(e.to_string());
                }
            }

            due += interval;
        }

        sleep_until(end).await;

        debug!(
            subsystem = %subsystem,
            ticks = report.ticks,
            samples = report.samples,
            failures = report.failures,
            "Sampling monitor finished"
        );

        match last_error {
            Some(last) if report.failures == report.ticks => Err(MonitorError::NoSamples {
                ticks: report.ticks,
                last,
            }),
            _ => Ok(report),
        }
    }
}
