//! Memory subsystem: allocation churn load and /proc/meminfo usage

use super::procfs;
use super::{HostPaths, Subsystem, Throttle};
use crate::error::{LoadError, SampleError};
use crate::models::{Reading, SubsystemKind};
use crate::monitor::Sampler;
use crate::worker::{LoadUnit, WorkerContext};
use std::collections::VecDeque;
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::Arc;

const PAGE_SIZE: usize = 4096;

/// Size of one allocation made by the churn loop
const CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Chunks a worker keeps alive before freeing the oldest
const RESIDENT_CHUNKS: usize = 8;

pub struct MemorySubsystem {
    paths: HostPaths,
    cores: usize,
}

impl MemorySubsystem {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            cores: num_cpus::get_physical().max(1),
        }
    }
}

impl Subsystem for MemorySubsystem {
    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Memory
    }

    /// One worker per physical core
    fn natural_concurrency(&self) -> usize {
        self.cores
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(MemorySampler {
            meminfo: self.paths.proc("meminfo"),
        })
    }

    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(MemoryLoad {
            throttle: Throttle::new(intensity),
        })
    }
}

struct MemorySampler {
    meminfo: PathBuf,
}

impl Sampler for MemorySampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        let info = procfs::read_meminfo(&self.meminfo)?;
        Ok(vec![
            Reading::new("total", info.total_kb as f64 / 1024.0, "MiB"),
            Reading::new("available", info.available_kb as f64 / 1024.0, "MiB"),
            Reading::new("used_percent", info.used_percent(), "%"),
            Reading::new("swap_used", info.swap_used_kb() as f64 / 1024.0, "MiB"),
        ])
    }
}

/// Allocates, touches and frees chunks in a bounded ring
struct MemoryLoad {
    throttle: Throttle,
}

impl LoadUnit for MemoryLoad {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError> {
        let mut resident: VecDeque<Vec<u8>> = VecDeque::with_capacity(RESIDENT_CHUNKS);
        let mut generation = ctx.index as u8;

        self.throttle.drive(ctx, || {
            let mut chunk = vec![0u8; CHUNK_BYTES];
            generation = generation.wrapping_add(1);
            for page in chunk.iter_mut().step_by(PAGE_SIZE) {
                *page = generation;
            }
            if resident.len() == RESIDENT_CHUNKS {
                resident.pop_front();
            }
            resident.push_back(chunk);
            Ok(())
        })?;

        black_box(&resident);
        Ok(())
    }
}
