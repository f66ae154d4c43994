//! Stress worker pool
//!
//! Runs the workers of one run plan on dedicated OS threads:
//! - every worker shares a single deadline computed before spawning
//! - workers are held at a start gate until the whole set exists
//! - a failed spawn cancels and joins the workers already started
//! - the pool returns only after every worker has been joined

mod gate;

pub use gate::{CancelToken, StartGate};

use crate::error::{LoadError, PoolError, WorkerStartError};
use crate::models::RunPlan;
use crate::observability::BenchMetrics;
use crate::recorder::Recorder;
use std::io;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-worker view of the plan it belongs to
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Zero-based worker index within the plan
    pub index: usize,
    /// Deadline shared by every worker of the plan
    pub deadline: Instant,
    pub cancel: CancelToken,
}

impl WorkerContext {
    /// Whether the load loop should exit
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Work that consumes one resource until its context says stop
pub trait LoadUnit: Send + Sync {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError>;
}

pub type WorkerJob = Box<dyn FnOnce() -> Result<(), LoadError> + Send + 'static>;
pub type WorkerHandle = JoinHandle<Result<(), LoadError>>;

/// Starts worker threads
pub trait Spawn: Send + Sync {
    fn spawn(&self, name: String, job: WorkerJob) -> io::Result<WorkerHandle>;
}

/// Spawns named OS threads
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
    fn spawn(&self, name: String, job: WorkerJob) -> io::Result<WorkerHandle> {
        thread::Builder::new().name(name).spawn(job)
    }
}

/// Workers spawned so far for one plan
///
/// Dropping the set without releasing or rolling back cancels and joins
/// every worker, so no thread outlives its plan.
struct StartedWorkers {
    handles: Vec<WorkerHandle>,
    gate: StartGate,
    cancel: CancelToken,
}

impl StartedWorkers {
    fn new(gate: StartGate, cancel: CancelToken) -> Self {
        Self {
            handles: Vec::new(),
            gate,
            cancel,
        }
    }

    fn push(&mut self, handle: WorkerHandle) {
        self.handles.push(handle);
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    /// Open the gate and wait for every worker to finish
    fn release_and_join(mut self) -> Vec<Result<(), String>> {
        self.gate.open();
        mem::take(&mut self.handles)
            .into_iter()
            .enumerate()
            .map(|(index, handle)| match handle.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("worker {} failed: {}", index, e)),
                Err(_) => Err(format!("worker {} panicked", index)),
            })
            .collect()
    }

    /// Cancel every started worker and join it; returns how many were joined
    fn rollback(mut self) -> usize {
        self.cancel_and_join()
    }

    fn cancel_and_join(&mut self) -> usize {
        self.cancel.cancel();
        self.gate.abort();
        let handles = mem::take(&mut self.handles);
        let count = handles.len();
        for handle in handles {
            let _ = handle.join();
        }
        count
    }
}

impl Drop for StartedWorkers {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.cancel_and_join();
        }
    }
}

/// Summary of a completed pool run
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport {
    pub workers: usize,
    pub elapsed: Duration,
}

/// Runs the stress workers of one plan at a time
pub struct WorkerPool {
    recorder: Arc<Recorder>,
    metrics: BenchMetrics,
    spawner: Arc<dyn Spawn>,
}

impl WorkerPool {
    pub fn new(recorder: Arc<Recorder>, metrics: BenchMetrics) -> Self {
        Self::with_spawner(recorder, metrics, Arc::new(ThreadSpawner))
    }

    pub fn with_spawner(
        recorder: Arc<Recorder>,
        metrics: BenchMetrics,
        spawner: Arc<dyn Spawn>,
    ) -> Self {
        Self {
            recorder,
            metrics,
            spawner,
        }
    }

    /// Run `plan.workers()` copies of `unit` until the plan deadline
    ///
    /// Blocks the calling thread until every worker has been joined.
    pub fn run(&self, plan: &RunPlan, unit: Arc<dyn LoadUnit>) -> Result<PoolReport, PoolError> {
        let requested = plan.workers();
        if requested == 0 {
            return Ok(PoolReport {
                workers: 0,
                elapsed: Duration::ZERO,
            });
        }

        let subsystem = plan.subsystem();
        let started_at = Instant::now();
        let deadline = started_at + plan.duration();
        let gate = StartGate::new();
        let cancel = CancelToken::new();
        let mut workers = StartedWorkers::new(gate.clone(), cancel.clone());

        self.recorder.info(format!(
            "Starting {} {} workers for {} profile ({:.1}s)",
            requested,
            subsystem,
            plan.profile(),
            plan.duration().as_secs_f64()
        ));

        for index in 0..requested {
            let ctx = WorkerContext {
                index,
                deadline,
                cancel: cancel.clone(),
            };
            let gate = gate.clone();
            let unit = Arc::clone(&unit);
            let job: WorkerJob = Box::new(move || {
                if !gate.wait() {
                    return Ok(());
                }
                unit.run(&ctx)
            });

            let name = format!("crucible-{}-{}", subsystem, index);
            match self.spawner.spawn(name, job) {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    let rolled_back = workers.rollback();
                    let err = WorkerStartError {
                        index,
                        requested,
                        rolled_back,
                        source,
                    };
                    self.recorder
                        .error(format!("{} workers: {}", subsystem, err));
                    return Err(err.into());
                }
            }
        }

        debug!(
            subsystem = %subsystem,
            workers = workers.len(),
            "All workers spawned, opening start gate"
        );
        self.metrics
            .inc_workers_started(subsystem.as_str(), requested as u64);

        let outcomes = workers.release_and_join();
        let elapsed = started_at.elapsed();
        let failures: Vec<String> = outcomes.into_iter().filter_map(Result::err).collect();

        for failure in &failures {
            self.recorder
                .error(format!("{} {}: {}", subsystem, plan.profile(), failure));
        }

        if failures.is_empty() {
            self.recorder.info(format!(
                "All {} {} workers completed in {:.1}s",
                requested,
                subsystem,
                elapsed.as_secs_f64()
            ));
            return Ok(PoolReport {
                workers: requested,
                elapsed,
            });
        }

        let failed = failures.len();
        let first = failures.into_iter().next().unwrap_or_default();
        Err(PoolError::Workers {
            failed,
            total: requested,
            first,
        })
    }
}
