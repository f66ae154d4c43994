//! End-to-end orchestration scenarios with scripted subsystems
//!
//! Time is paused so that multi-minute plans finish instantly while the
//! monitor schedule stays exact.

use super::*;
use crate::error::{LoadError, RecorderError, SampleError};
use crate::models::{Reading, TestMode};
use crate::monitor::Sampler;
use crate::recorder::{RecorderConfig, METRICS_FILE, SESSION_FILE};
use crate::worker::{LoadUnit, WorkerContext};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct MockSubsystem {
    kind: SubsystemKind,
    concurrency: usize,
    fail_load: bool,
    fail_sampling: bool,
    runs: Arc<AtomicUsize>,
}

impl MockSubsystem {
    fn new(kind: SubsystemKind, concurrency: usize) -> Self {
        Self {
            kind,
            concurrency,
            fail_load: false,
            fail_sampling: false,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    fn failing_sampling(mut self) -> Self {
        self.fail_sampling = true;
        self
    }
}

impl Subsystem for MockSubsystem {
    fn kind(&self) -> SubsystemKind {
        self.kind
    }

    fn natural_concurrency(&self) -> usize {
        self.concurrency
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(MockSampler {
            fail: self.fail_sampling,
        })
    }

    fn load_unit(&self, _intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(MockUnit {
            fail: self.fail_load,
            runs: Arc::clone(&self.runs),
        })
    }
}

struct MockSampler {
    fail: bool,
}

impl Sampler for MockSampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        if self.fail {
            return Err(SampleError::Unavailable("probe offline".to_string()));
        }
        Ok(vec![Reading::new("value", 1.0, "units")])
    }
}

/// Returns straight away so that paused time drives the plan length
struct MockUnit {
    fail: bool,
    runs: Arc<AtomicUsize>,
}

impl LoadUnit for MockUnit {
    fn run(&self, _ctx: &WorkerContext) -> Result<(), LoadError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LoadError::Setup("device busy".to_string()));
        }
        Ok(())
    }
}

fn config(dir: &TempDir, components: Vec<SubsystemKind>, mode: TestMode) -> BenchConfig {
    BenchConfig {
        components,
        mode,
        duration_secs: 20,
        sample_interval_secs: 5,
        diagnostics_secs: 0,
        log_dir: dir.path().join("logs"),
        ..Default::default()
    }
}

fn read_log(dir: &TempDir, file: &str) -> String {
    std::fs::read_to_string(PathBuf::from(dir.path()).join("logs").join(file)).unwrap()
}

/// Metric rows per profile column
fn rows_by_profile(metrics: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for row in metrics.lines().skip(1) {
        let fields: Vec<&str> = row.split(',').collect();
        *counts.entry(fields[3].to_string()).or_insert(0) += 1;
    }
    counts
}

#[tokio::test(start_paused = true)]
async fn test_all_mode_scenario() {
    let dir = TempDir::new().unwrap();
    let mock = MockSubsystem::new(SubsystemKind::Cpu, 4);
    let runs = Arc::clone(&mock.runs);
    let mut orchestrator = Orchestrator::builder()
        .config(config(&dir, vec![SubsystemKind::Cpu], TestMode::All))
        .subsystem(Arc::new(mock))
        .build();

    let report = orchestrator.run().await.unwrap();

    assert!(report.success);
    let shape: Vec<(Profile, usize, u64, f64)> = report
        .outcomes
        .iter()
        .map(|o| (o.profile, o.workers, o.samples, o.duration_secs))
        .collect();
    assert_eq!(
        shape,
        vec![
            (Profile::Baseline, 0, 4, 20.0),
            (Profile::Load, 2, 4, 20.0),
            (Profile::Stress, 4, 4, 20.0),
            (Profile::Spike, 4, 6, 30.0),
        ]
    );
    assert_eq!(runs.load(Ordering::SeqCst), 10);
    assert!(report.elapsed_secs >= 90.0);

    let counts = rows_by_profile(&read_log(&dir, METRICS_FILE));
    assert_eq!(counts.get("baseline"), Some(&4));
    assert_eq!(counts.get("load"), Some(&4));
    assert_eq!(counts.get("stress"), Some(&4));
    assert_eq!(counts.get("spike"), Some(&6));

    assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    assert!(!orchestrator.recorder().is_initialized());

    let session = read_log(&dir, SESSION_FILE);
    assert!(session.contains("Configuration: components=cpu mode=all"));
    assert!(session.contains("Estimated total duration: 90s across 4 run plans"));
    assert!(session.contains("All 4 run plans completed successfully"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_plans_do_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::builder()
        .config(config(&dir, vec![SubsystemKind::Memory], TestMode::All))
        .subsystem(Arc::new(
            MockSubsystem::new(SubsystemKind::Memory, 2).failing_load(),
        ))
        .build();

    let report = orchestrator.run().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 3);
    assert!(report.outcomes[0].success);
    for outcome in &report.outcomes[1..] {
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or("").contains("device busy"));
        // Sampling kept going while the workers failed
        assert!(outcome.samples > 0);
    }

    assert!(!orchestrator.recorder().is_initialized());
    let session = read_log(&dir, SESSION_FILE);
    assert!(session.contains("[ERROR] Run plan memory stress failed"));
    assert!(session.contains("[ERROR] 3 of 4 run plans failed"));
    assert!(session
        .lines()
        .last()
        .unwrap()
        .ends_with("Logging system shutting down"));
}

#[tokio::test(start_paused = true)]
async fn test_sampling_failure_fails_plan() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::builder()
        .config(config(&dir, vec![SubsystemKind::Network], TestMode::Stress))
        .subsystem(Arc::new(
            MockSubsystem::new(SubsystemKind::Network, 1).failing_sampling(),
        ))
        .build();

    let report = orchestrator.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(!outcome.success);
    assert_eq!(outcome.samples, 0);
    assert_eq!(outcome.sample_failures, 4);
    assert_eq!(
        read_log(&dir, SESSION_FILE)
            .matches("[WARNING] Failed to sample network metrics")
            .count(),
        4
    );
}

#[tokio::test(start_paused = true)]
async fn test_plans_follow_component_order() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, vec![SubsystemKind::Cpu, SubsystemKind::Io], TestMode::Baseline);
    cfg.duration_secs = 5;
    let mut orchestrator = Orchestrator::builder()
        .config(cfg)
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Io, 2)))
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Cpu, 8)))
        .build();

    let report = orchestrator.run().await.unwrap();

    let order: Vec<SubsystemKind> = report.outcomes.iter().map(|o| o.subsystem).collect();
    assert_eq!(order, vec![SubsystemKind::Cpu, SubsystemKind::Io]);
    assert!(report.outcomes.iter().all(|o| o.samples == 1));
}

#[tokio::test(start_paused = true)]
async fn test_diagnostics_phase_samples_before_tests() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, vec![SubsystemKind::Storage], TestMode::Baseline);
    cfg.duration_secs = 5;
    cfg.diagnostics_secs = 10;
    let mut orchestrator = Orchestrator::builder()
        .config(cfg)
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Storage, 4)))
        .build();

    let report = orchestrator.run().await.unwrap();
    assert!(report.success);

    let session = read_log(&dir, SESSION_FILE);
    let diag = session.find("Diagnostics completed").unwrap();
    let plan = session.find("Running storage baseline").unwrap();
    assert!(diag < plan);

    // two diagnostics ticks plus one baseline tick
    let metrics = read_log(&dir, METRICS_FILE);
    assert_eq!(metrics.lines().skip(1).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_diagnostics_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, vec![SubsystemKind::Cpu], TestMode::All);
    cfg.diagnostics_secs = 2;
    let mock = MockSubsystem::new(SubsystemKind::Cpu, 2).failing_sampling();
    let runs = Arc::clone(&mock.runs);
    let mut orchestrator = Orchestrator::builder()
        .config(cfg)
        .subsystem(Arc::new(mock))
        .build();

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, CrucibleError::DiagnosticsFailed(ref s) if s.starts_with("cpu")));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!orchestrator.recorder().is_initialized());
    assert_eq!(orchestrator.state(), OrchestratorState::Idle);

    let session = read_log(&dir, SESSION_FILE);
    assert!(session.contains("[ERROR] Diagnostics failed, aborting test"));
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_recorder() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, vec![SubsystemKind::Cpu], TestMode::Load);
    cfg.sample_interval_secs = 30;
    let mut orchestrator = Orchestrator::builder()
        .config(cfg)
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Cpu, 2)))
        .build();

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        err,
        CrucibleError::Configuration(ConfigurationError::CadenceExceedsDuration { .. })
    ));
    assert!(!dir.path().join("logs").exists());
    assert_eq!(orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn test_missing_subsystem_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::builder()
        .config(config(
            &dir,
            vec![SubsystemKind::Cpu, SubsystemKind::Memory],
            TestMode::Baseline,
        ))
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Cpu, 2)))
        .build();

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(
        err,
        CrucibleError::Configuration(ConfigurationError::MissingSubsystem(ref k)) if k == "memory"
    ));
}

#[tokio::test]
async fn test_live_recorder_cannot_be_reinitialized() {
    let dir = TempDir::new().unwrap();
    let other = RecorderConfig::new(dir.path().join("other"));
    let recorder = Arc::new(Recorder::open(&other).unwrap());
    let mut orchestrator = Orchestrator::builder()
        .config(config(&dir, vec![SubsystemKind::Cpu], TestMode::Baseline))
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Cpu, 2)))
        .recorder(Arc::clone(&recorder))
        .build();

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        err,
        CrucibleError::Recorder(RecorderError::AlreadyInitialized)
    ));
    assert!(recorder.is_initialized());
    assert!(!dir.path().join("logs").exists());
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes_to_json() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, vec![SubsystemKind::Cpu], TestMode::Spike);
    cfg.duration_secs = 10;
    let mut orchestrator = Orchestrator::builder()
        .config(cfg)
        .scheduler(ProfileScheduler::new().with_spike_duration(std::time::Duration::from_secs(10)))
        .subsystem(Arc::new(MockSubsystem::new(SubsystemKind::Cpu, 3)))
        .build();

    let report = orchestrator.run().await.unwrap();
    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["outcomes"][0]["subsystem"], "cpu");
    assert_eq!(json["outcomes"][0]["profile"], "spike");
    assert_eq!(json["outcomes"][0]["workers"], 3);
    assert_eq!(json["outcomes"][0]["samples"], 2);
    assert!(json["outcomes"][0].get("error").is_none());
}

#[test]
fn test_state_display() {
    assert_eq!(
        OrchestratorState::RunningPlan { index: 0, total: 4 }.to_string(),
        "running plan 1/4"
    );
    assert_eq!(OrchestratorState::Idle.to_string(), "idle");
}
