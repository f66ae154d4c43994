//! Storage subsystem: sequential scratch-file throughput

use super::procfs::{self, SECTOR_SIZE};
use super::{HostPaths, ScratchFile, Subsystem, Throttle};
use crate::error::{LoadError, SampleError};
use crate::models::{Reading, SubsystemKind};
use crate::monitor::{rate, DeltaTracker, Sampler};
use crate::worker::{LoadUnit, WorkerContext};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

const BLOCK_BYTES: usize = 1024 * 1024;

/// Scratch file size per worker; writes wrap around at this offset
const FILE_BYTES: u64 = 64 * 1024 * 1024;

/// Blocks written between a sync and read-back
const SYNC_EVERY: u64 = 16;

pub struct StorageSubsystem {
    paths: HostPaths,
    cpus: usize,
}

impl StorageSubsystem {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            cpus: num_cpus::get().max(1),
        }
    }
}

impl Subsystem for StorageSubsystem {
    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Storage
    }

    fn natural_concurrency(&self) -> usize {
        self.cpus.min(4)
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(StorageSampler {
            diskstats: self.paths.proc("diskstats"),
            read_bytes: DeltaTracker::new(),
            written_bytes: DeltaTracker::new(),
        })
    }

    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(StorageLoad {
            scratch_dir: self.paths.scratch_dir.clone(),
            throttle: Throttle::new(intensity),
        })
    }
}

struct StorageSampler {
    diskstats: PathBuf,
    read_bytes: DeltaTracker<u64>,
    written_bytes: DeltaTracker<u64>,
}

impl Sampler for StorageSampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        let counters = procfs::read_diskstats(&self.diskstats)?;
        let read = self
            .read_bytes
            .observe(counters.sectors_read * SECTOR_SIZE, |p, c, e| rate(*p, *c, e));
        let written = self
            .written_bytes
            .observe(counters.sectors_written * SECTOR_SIZE, |p, c, e| rate(*p, *c, e));

        Ok(vec![
            Reading::new("read_bytes", read, "B/s"),
            Reading::new("write_bytes", written, "B/s"),
        ])
    }
}

/// Writes 1 MiB blocks sequentially, syncing and reading back periodically
struct StorageLoad {
    scratch_dir: PathBuf,
    throttle: Throttle,
}

impl LoadUnit for StorageLoad {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError> {
        let mut scratch = ScratchFile::create(&self.scratch_dir, "storage", ctx.index)?;
        let block = vec![0xA5u8; BLOCK_BYTES];
        let mut readback = vec![0u8; BLOCK_BYTES];
        let mut offset = 0u64;
        let mut written = 0u64;

        self.throttle.drive(ctx, || {
            let file = &mut scratch.file;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&block)?;
            written += 1;

            if written % SYNC_EVERY == 0 {
                file.sync_data()?;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut readback)?;
            }

            offset = (offset + BLOCK_BYTES as u64) % FILE_BYTES;
            Ok(())
        })
    }
}
