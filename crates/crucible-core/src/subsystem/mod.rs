//! Host subsystems
//!
//! A subsystem pairs a metric source with a load generator for one part
//! of the machine. The engine only sees the [`Subsystem`] trait; the host
//! implementations here read Linux pseudo-files under injectable roots so
//! they can be exercised against fake trees in tests.

mod cpu;
mod io;
mod memory;
mod network;
pub mod procfs;
mod storage;

pub use cpu::CpuSubsystem;
pub use io::IoSubsystem;
pub use memory::MemorySubsystem;
pub use network::NetworkSubsystem;
pub use storage::StorageSubsystem;

use crate::error::LoadError;
use crate::models::SubsystemKind;
use crate::monitor::Sampler;
use crate::worker::{LoadUnit, WorkerContext};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One stressable, observable part of the host
pub trait Subsystem: Send + Sync {
    fn kind(&self) -> SubsystemKind;

    /// Number of workers that saturate this subsystem
    fn natural_concurrency(&self) -> usize;

    /// Fresh metric source; derived metrics start from the sentinel
    fn sampler(&self) -> Box<dyn Sampler>;

    /// Load generator running at `intensity` percent (full load when `None`)
    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit>;
}

/// Filesystem roots the host subsystems read from and write to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    /// Directory for storage and I/O scratch files
    pub scratch_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl HostPaths {
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn with_sys_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sys_root = root.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn proc(&self, relative: &str) -> PathBuf {
        self.proc_root.join(relative)
    }

    pub fn sys(&self, relative: &str) -> PathBuf {
        self.sys_root.join(relative)
    }
}

/// Host implementations for the requested kinds, in the same order
pub fn host_subsystems(kinds: &[SubsystemKind], paths: &HostPaths) -> Vec<Arc<dyn Subsystem>> {
    kinds
        .iter()
        .map(|kind| -> Arc<dyn Subsystem> {
            match kind {
                SubsystemKind::Cpu => Arc::new(CpuSubsystem::new(paths.clone())),
                SubsystemKind::Memory => Arc::new(MemorySubsystem::new(paths.clone())),
                SubsystemKind::Storage => Arc::new(StorageSubsystem::new(paths.clone())),
                SubsystemKind::Network => Arc::new(NetworkSubsystem::new(paths.clone())),
                SubsystemKind::Io => Arc::new(IoSubsystem::new(paths.clone())),
            }
        })
        .collect()
}

/// Duty cycle that turns an intensity percentage into busy and idle time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    busy: Duration,
    idle: Duration,
}

impl Throttle {
    /// Length of one busy + idle period
    pub const PERIOD: Duration = Duration::from_millis(100);

    pub fn new(intensity: Option<u8>) -> Self {
        let percent = u32::from(intensity.unwrap_or(100).min(100));
        let busy = Self::PERIOD * percent / 100;
        Self {
            busy,
            idle: Self::PERIOD - busy,
        }
    }

    pub fn busy(&self) -> Duration {
        self.busy
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Call `step` until the worker must stop, resting for the idle share
    /// of every period
    pub fn drive<F>(&self, ctx: &WorkerContext, mut step: F) -> Result<(), LoadError>
    where
        F: FnMut() -> Result<(), LoadError>,
    {
        while !ctx.should_stop() {
            let busy_until = Instant::now() + self.busy;
            while Instant::now() < busy_until && !ctx.should_stop() {
                step()?;
            }
            if !self.idle.is_zero() {
                let rest = self.idle.min(ctx.remaining());
                if !rest.is_zero() {
                    thread::sleep(rest);
                }
            }
        }
        Ok(())
    }
}

/// Worker-owned file in the scratch directory, removed on drop
pub(crate) struct ScratchFile {
    path: PathBuf,
    pub(crate) file: File,
}

impl ScratchFile {
    pub(crate) fn create(dir: &Path, tag: &str, index: usize) -> Result<Self, LoadError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "crucible-{}-{}-{}.dat",
            tag,
            std::process::id(),
            index
        ));
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self { path, file })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
