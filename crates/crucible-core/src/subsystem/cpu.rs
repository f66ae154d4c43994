//! CPU subsystem: busy-loop load, utilisation, load average and temperature

use super::procfs::{self, CpuTimes};
use super::{HostPaths, Subsystem, Throttle};
use crate::error::{LoadError, SampleError};
use crate::models::{Reading, SubsystemKind};
use crate::monitor::{DeltaTracker, Sampler};
use crate::worker::{LoadUnit, WorkerContext};
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::Arc;

pub struct CpuSubsystem {
    paths: HostPaths,
    cpus: usize,
}

impl CpuSubsystem {
    pub fn new(paths: HostPaths) -> Self {
        Self::with_cpus(paths, num_cpus::get())
    }

    pub fn with_cpus(paths: HostPaths, cpus: usize) -> Self {
        Self {
            paths,
            cpus: cpus.max(1),
        }
    }
}

impl Subsystem for CpuSubsystem {
    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Cpu
    }

    /// One worker per logical CPU
    fn natural_concurrency(&self) -> usize {
        self.cpus
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(CpuSampler {
            stat: self.paths.proc("stat"),
            loadavg: self.paths.proc("loadavg"),
            thermal: self.paths.sys("class/thermal"),
            usage: DeltaTracker::new(),
        })
    }

    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(CpuLoad {
            throttle: Throttle::new(intensity),
        })
    }
}

struct CpuSampler {
    stat: PathBuf,
    loadavg: PathBuf,
    thermal: PathBuf,
    usage: DeltaTracker<CpuTimes>,
}

impl Sampler for CpuSampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        let times = procfs::read_cpu_stat(&self.stat)?;
        let usage = self.usage.observe(times, |prev, cur, _| procfs::cpu_usage(prev, cur));
        let load = procfs::read_loadavg(&self.loadavg)?;

        let mut readings = vec![
            Reading::new("usage", usage, "%"),
            Reading::new("load_1m", load, "load"),
        ];
        if let Some(celsius) = procfs::read_max_temperature(&self.thermal) {
            readings.push(Reading::new("temperature", celsius, "C"));
        }
        Ok(readings)
    }
}

/// Floating-point square-root chain
struct CpuLoad {
    throttle: Throttle,
}

impl LoadUnit for CpuLoad {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError> {
        let mut x = 1.0f64 + ctx.index as f64;
        self.throttle.drive(ctx, || {
            for i in 0..10_000u32 {
                x = (x + f64::from(i)).sqrt();
            }
            black_box(x);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::CancelToken;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn fake_host(dir: &TempDir) -> HostPaths {
        let proc_root = dir.path().join("proc");
        let sys_root = dir.path().join("sys");
        fs::create_dir_all(&proc_root).unwrap();
        fs::create_dir_all(sys_root.join("class/thermal/thermal_zone0")).unwrap();
        fs::write(proc_root.join("stat"), "cpu  100 0 100 700 100 0 0 0\n").unwrap();
        fs::write(proc_root.join("loadavg"), "1.25 0.90 0.50 2/300 4242\n").unwrap();
        fs::write(sys_root.join("class/thermal/thermal_zone0/temp"), "52000\n").unwrap();
        HostPaths::default()
            .with_proc_root(proc_root)
            .with_sys_root(sys_root)
    }

    #[test]
    fn test_sampler_derives_usage_from_fake_proc() {
        let dir = TempDir::new().unwrap();
        let paths = fake_host(&dir);
        let subsystem = CpuSubsystem::with_cpus(paths.clone(), 4);
        assert_eq!(subsystem.natural_concurrency(), 4);

        let mut sampler = subsystem.sampler();
        let first = sampler.snapshot().unwrap();
        assert_eq!(first[0], Reading::new("usage", 0.0, "%"));
        assert_eq!(first[1], Reading::new("load_1m", 1.25, "load"));
        assert_eq!(first[2], Reading::new("temperature", 52.0, "C"));

        // 100 more busy jiffies and 100 more idle ones
        fs::write(paths.proc("stat"), "cpu  200 0 100 800 100 0 0 0\n").unwrap();
        let second = sampler.snapshot().unwrap();
        assert_eq!(second[0].value, 50.0);
    }

    #[test]
    fn test_sampler_reports_missing_stat() {
        let dir = TempDir::new().unwrap();
        let paths = HostPaths::default().with_proc_root(dir.path());
        let mut sampler = CpuSubsystem::with_cpus(paths, 1).sampler();
        assert!(matches!(sampler.snapshot(), Err(SampleError::Read { .. })));
    }

    #[test]
    fn test_load_unit_runs_until_deadline() {
        let unit = CpuSubsystem::with_cpus(HostPaths::default(), 1).load_unit(Some(50));
        let ctx = WorkerContext {
            index: 0,
            deadline: Instant::now() + Duration::from_millis(120),
            cancel: CancelToken::new(),
        };
        let started = Instant::now();
        unit.run(&ctx).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
