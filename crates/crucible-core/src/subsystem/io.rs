//! I/O subsystem: small synchronous writes and request rates

use super::procfs;
use super::{HostPaths, ScratchFile, Subsystem, Throttle};
use crate::error::{LoadError, SampleError};
use crate::models::{Reading, SubsystemKind};
use crate::monitor::{rate, DeltaTracker, Sampler};
use crate::worker::{LoadUnit, WorkerContext};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

const RECORD_BYTES: usize = 4096;
const FILE_BYTES: u64 = 4 * 1024 * 1024;
const READ_EVERY: u64 = 8;

/// Synchronous writers contend on the device queue; two saturate it
const IO_WORKERS: usize = 2;

pub struct IoSubsystem {
    paths: HostPaths,
}

impl IoSubsystem {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }
}

impl Subsystem for IoSubsystem {
    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Io
    }

    fn natural_concurrency(&self) -> usize {
        IO_WORKERS
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(IoSampler {
            diskstats: self.paths.proc("diskstats"),
            reads: DeltaTracker::new(),
            writes: DeltaTracker::new(),
        })
    }

    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(SyncWriteLoad {
            scratch_dir: self.paths.scratch_dir.clone(),
            throttle: Throttle::new(intensity),
        })
    }
}

struct IoSampler {
    diskstats: PathBuf,
    reads: DeltaTracker<u64>,
    writes: DeltaTracker<u64>,
}

impl Sampler for IoSampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        let counters = procfs::read_diskstats(&self.diskstats)?;
        let reads = self
            .reads
            .observe(counters.reads_completed, |p, c, e| rate(*p, *c, e));
        let writes = self
            .writes
            .observe(counters.writes_completed, |p, c, e| rate(*p, *c, e));

        Ok(vec![
            Reading::new("read_ops", reads, "ops/s"),
            Reading::new("write_ops", writes, "ops/s"),
            Reading::new("in_flight", counters.in_flight as f64, "requests"),
        ])
    }
}

/// 4 KiB records, each followed by a data sync
struct SyncWriteLoad {
    scratch_dir: PathBuf,
    throttle: Throttle,
}

impl LoadUnit for SyncWriteLoad {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError> {
        let mut scratch = ScratchFile::create(&self.scratch_dir, "io", ctx.index)?;
        let record = [0x5Au8; RECORD_BYTES];
        let mut readback = [0u8; RECORD_BYTES];
        let mut offset = 0u64;
        let mut ops = 0u64;

        self.throttle.drive(ctx, || {
            let file = &mut scratch.file;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&record)?;
            file.sync_data()?;
            ops += 1;

            if ops % READ_EVERY == 0 {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut readback)?;
            }

            offset = (offset + RECORD_BYTES as u64) % FILE_BYTES;
            Ok(())
        })
    }
}
