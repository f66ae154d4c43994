//! Benchmark orchestration
//!
//! Drives one complete run:
//! - validates the configuration and expands every subsystem into run plans
//! - initializes the recorder and echoes the configuration
//! - runs an observation-only diagnostics phase when configured
//! - executes each plan with its worker pool and sampling monitor side by side
//! - summarizes and shuts the recorder down, whatever the outcome

use crate::config::BenchConfig;
use crate::error::{ConfigurationError, CrucibleError, MonitorError};
use crate::models::{Profile, RunPlan, SampleCadence, SubsystemKind};
use crate::monitor::{MonitorReport, SamplingMonitor};
use crate::observability::{BenchMetrics, RunLogger};
use crate::recorder::Recorder;
use crate::scheduler::{self, PlanRequest, ProfileScheduler};
use crate::subsystem::Subsystem;
use crate::worker::{Spawn, ThreadSpawner, WorkerPool};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

#[cfg(test)]
mod tests;

/// Lifecycle of an orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Configuring,
    Initialized,
    RunningPlan { index: usize, total: usize },
    ShuttingDown,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Idle => f.write_str("idle"),
            OrchestratorState::Configuring => f.write_str("configuring"),
            OrchestratorState::Initialized => f.write_str("initialized"),
            OrchestratorState::RunningPlan { index, total } => {
                write!(f, "running plan {}/{}", index + 1, total)
            }
            OrchestratorState::ShuttingDown => f.write_str("shutting down"),
        }
    }
}

/// Result of one executed run plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub subsystem: SubsystemKind,
    pub profile: Profile,
    pub workers: usize,
    pub duration_secs: f64,
    pub samples: u64,
    pub sample_failures: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

/// Summary of a whole benchmark run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub outcomes: Vec<PlanOutcome>,
    /// Every plan succeeded
    pub success: bool,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<(), CrucibleError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|source| CrucibleError::Report {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Builder for a benchmark orchestrator
pub struct OrchestratorBuilder {
    config: BenchConfig,
    subsystems: Vec<Arc<dyn Subsystem>>,
    scheduler: ProfileScheduler,
    spawner: Arc<dyn Spawn>,
    recorder: Option<Arc<Recorder>>,
    host: String,
}

impl OrchestratorBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: BenchConfig::default(),
            subsystems: Vec::new(),
            scheduler: ProfileScheduler::new(),
            spawner: Arc::new(ThreadSpawner),
            recorder: None,
            host: "localhost".to_string(),
        }
    }

    pub fn config(mut self, config: BenchConfig) -> Self {
        self.config = config;
        self
    }

    /// Register one subsystem implementation
    pub fn subsystem(mut self, subsystem: Arc<dyn Subsystem>) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    pub fn subsystems(mut self, subsystems: impl IntoIterator<Item = Arc<dyn Subsystem>>) -> Self {
        self.subsystems.extend(subsystems);
        self
    }

    pub fn scheduler(mut self, scheduler: ProfileScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set how worker threads are started
    pub fn spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Share an existing recorder instead of creating one
    pub fn recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Host name attached to structured run events
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            config: self.config,
            subsystems: self.subsystems,
            scheduler: self.scheduler,
            spawner: self.spawner,
            recorder: self.recorder.unwrap_or_else(|| Arc::new(Recorder::new())),
            metrics: BenchMetrics::new(),
            run_logger: RunLogger::new(self.host),
            state: OrchestratorState::Idle,
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A run plan paired with the subsystem that executes it
struct ScheduledPlan {
    plan: RunPlan,
    subsystem: Arc<dyn Subsystem>,
}

/// Runs a configured benchmark from validation to recorder shutdown
pub struct Orchestrator {
    config: BenchConfig,
    subsystems: Vec<Arc<dyn Subsystem>>,
    scheduler: ProfileScheduler,
    spawner: Arc<dyn Spawn>,
    recorder: Arc<Recorder>,
    metrics: BenchMetrics,
    run_logger: RunLogger,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Validate the configuration and expand it into ordered run plans
    fn schedule(&self) -> Result<Vec<ScheduledPlan>, ConfigurationError> {
        self.config.validate()?;

        let mut scheduled = Vec::new();
        for kind in &self.config.components {
            let subsystem = self
                .subsystems
                .iter()
                .find(|s| s.kind() == *kind)
                .ok_or_else(|| ConfigurationError::MissingSubsystem(kind.to_string()))?;

            let request = PlanRequest {
                subsystem: *kind,
                mode: self.config.mode,
                natural_concurrency: subsystem.natural_concurrency(),
                duration: self.config.duration(),
                intensity: self.config.intensity,
            };
            for plan in self.scheduler.expand(&request)? {
                scheduled.push(ScheduledPlan {
                    plan,
                    subsystem: Arc::clone(subsystem),
                });
            }
        }

        Ok(scheduled)
    }

    /// Execute the whole benchmark
    ///
    /// Configuration and recorder initialization errors abort before any
    /// plan runs. A failed plan is recorded and the run moves on; the overall
    /// result is reflected in [`RunReport::success`].
    pub async fn run(&mut self) -> Result<RunReport, CrucibleError> {
        let started_at = Local::now();
        let clock = Instant::now();
        self.state = OrchestratorState::Configuring;

        // The recorder is not up yet, so configuration problems go to the
        // process log only.
        let scheduled = self
            .schedule()
            .and_then(|plans| self.config.cadence().map(|cadence| (plans, cadence)));
        let (plans, cadence) = match scheduled {
            Ok(scheduled) => scheduled,
            Err(e) => {
                error!(error = %e, "Invalid benchmark configuration");
                self.state = OrchestratorState::Idle;
                return Err(e.into());
            }
        };

        if let Err(e) = self.recorder.init(&self.config.recorder_config()) {
            error!(
                error = %e,
                directory = %self.config.log_dir.display(),
                "Failed to initialize recorder"
            );
            self.state = OrchestratorState::Idle;
            return Err(e.into());
        }
        self.state = OrchestratorState::Initialized;

        let run_plans: Vec<RunPlan> = plans.iter().map(|s| s.plan.clone()).collect();
        let estimate = scheduler::estimate(&run_plans) + self.config.diagnostics();
        self.recorder
            .info(format!("Configuration: {}", self.config));
        self.recorder.info(format!(
            "Estimated total duration: {}s across {} run plans",
            estimate.as_secs(),
            plans.len()
        ));
        self.run_logger
            .log_run_started(plans.len(), estimate.as_secs());

        if !self.config.diagnostics().is_zero() {
            if let Err(e) = self.diagnostics(&plans).await {
                self.recorder
                    .error(format!("Diagnostics failed, aborting test: {}", e));
                self.shutdown();
                return Err(e);
            }
        }

        let total = plans.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, scheduled) in plans.iter().enumerate() {
            self.state = OrchestratorState::RunningPlan { index, total };
            outcomes.push(self.execute(scheduled, cadence).await);
        }

        let report = RunReport {
            started_at,
            success: outcomes.iter().all(|o| o.success),
            outcomes,
            elapsed_secs: clock.elapsed().as_secs_f64(),
        };

        if report.success {
            self.recorder.info(format!(
                "All {} run plans completed successfully",
                report.outcomes.len()
            ));
        } else {
            self.recorder.error(format!(
                "{} of {} run plans failed",
                report.failed(),
                report.outcomes.len()
            ));
        }
        self.run_logger
            .log_run_finished(report.passed(), report.failed(), report.elapsed_secs);

        self.shutdown();
        Ok(report)
    }

    /// Observe every subsystem once, without load, before the tests
    async fn diagnostics(&self, plans: &[ScheduledPlan]) -> Result<(), CrucibleError> {
        let duration = self.config.diagnostics();
        let cadence = SampleCadence::new(self.config.sample_interval().min(duration), duration)?;
        self.recorder.info(format!(
            "Running diagnostics for {}s",
            duration.as_secs()
        ));

        let mut seen = Vec::new();
        let mut tasks = Vec::new();
        for scheduled in plans {
            let kind = scheduled.subsystem.kind();
            if seen.contains(&kind) {
                continue;
            }
            seen.push(kind);

            let plan = RunPlan::new(kind, Profile::Baseline, 0, duration, None);
            let monitor = SamplingMonitor::new(Arc::clone(&self.recorder), self.metrics.clone());
            let mut sampler = scheduled.subsystem.sampler();
            let task = tokio::spawn(async move {
                monitor.run(&plan, cadence, sampler.as_mut()).await
            });
            tasks.push((kind, task));
        }

        let mut failed = Vec::new();
        for (kind, task) in tasks {
            let result = task
                .await
                .map_err(|e| MonitorError::Aborted(e.to_string()))
                .and_then(|r| r);
            match result {
                Ok(report) if report.samples > 0 => {}
                Ok(_) => failed.push(format!("{} (no samples)", kind)),
                Err(e) => failed.push(format!("{} ({})", kind, e)),
            }
        }

        if failed.is_empty() {
            self.recorder.info("Diagnostics completed");
            Ok(())
        } else {
            Err(CrucibleError::DiagnosticsFailed(failed.join(", ")))
        }
    }

    /// Run one plan's pool and monitor concurrently and wait for both
    async fn execute(&self, scheduled: &ScheduledPlan, cadence: SampleCadence) -> PlanOutcome {
        let plan = &scheduled.plan;
        let started = Instant::now();
        self.recorder.info(format!("Running {}", plan));

        let pool = WorkerPool::with_spawner(
            Arc::clone(&self.recorder),
            self.metrics.clone(),
            Arc::clone(&self.spawner),
        );
        let unit = scheduled.subsystem.load_unit(plan.intensity());
        let pool_plan = plan.clone();
        let pool_task = tokio::task::spawn_blocking(move || pool.run(&pool_plan, unit));

        let monitor = SamplingMonitor::new(Arc::clone(&self.recorder), self.metrics.clone());
        let mut sampler = scheduled.subsystem.sampler();
        let monitor_plan = plan.clone();
        let monitor_task = tokio::spawn(async move {
            monitor
                .run(&monitor_plan, cadence, sampler.as_mut())
                .await
        });

        let (pool_result, monitor_result) = tokio::join!(pool_task, monitor_task);

        let mut errors = Vec::new();
        match pool_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => errors.push(e.to_string()),
            Err(e) => errors.push(format!("worker pool task aborted: {}", e)),
        }

        let mut sampled = MonitorReport::default();
        match monitor_result {
            Ok(Ok(report)) => sampled = report,
            Ok(Err(e)) => {
                if let MonitorError::NoSamples { ticks, .. } = &e {
                    sampled.ticks = *ticks;
                    sampled.failures = *ticks;
                }
                errors.push(e.to_string());
            }
            Err(e) => errors.push(MonitorError::Aborted(e.to_string()).to_string()),
        }

        let elapsed = started.elapsed().as_secs_f64();
        let error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };

        match &error {
            None => self.recorder.info(format!(
                "Completed {} {}: {} samples in {:.1}s",
                plan.subsystem(),
                plan.profile(),
                sampled.samples,
                elapsed
            )),
            Some(e) => self.recorder.error(format!(
                "Run plan {} {} failed: {}",
                plan.subsystem(),
                plan.profile(),
                e
            )),
        }

        self.metrics.observe_plan(
            plan.subsystem().as_str(),
            plan.profile().as_str(),
            error.is_none(),
            elapsed,
        );
        self.run_logger.log_plan_finished(
            plan.subsystem().as_str(),
            plan.profile().as_str(),
            plan.workers(),
            sampled.samples,
            elapsed,
            error.as_deref(),
        );

        PlanOutcome {
            subsystem: plan.subsystem(),
            profile: plan.profile(),
            workers: plan.workers(),
            duration_secs: plan.duration().as_secs_f64(),
            samples: sampled.samples,
            sample_failures: sampled.failures,
            success: error.is_none(),
            error,
            elapsed_secs: elapsed,
        }
    }

    fn shutdown(&mut self) {
        self.state = OrchestratorState::ShuttingDown;
        self.metrics.set_log_rotations(self.recorder.rotation_count());
        self.recorder.shutdown();
        info!("Benchmark run finished, recorder shut down");
        self.state = OrchestratorState::Idle;
    }
}
