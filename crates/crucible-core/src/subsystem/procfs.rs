//! Parsers for the Linux pseudo-files the host samplers read
//!
//! Each `parse_*` function takes the file content so it can be tested
//! without a real `/proc`.

use crate::error::SampleError;
use std::fs;
use std::path::Path;

/// Bytes per sector as reported by /proc/diskstats
pub const SECTOR_SIZE: u64 = 512;

pub fn read_file(path: &Path) -> Result<String, SampleError> {
    fs::read_to_string(path).map_err(|source| SampleError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_error(path: &Path, detail: impl Into<String>) -> SampleError {
    SampleError::Parse {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Aggregate CPU time counters from the `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    /// idle + iowait
    pub idle: u64,
}

/// Parse the aggregate `cpu` line
pub fn parse_cpu_stat(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }

    Some(CpuTimes {
        total: values.iter().sum(),
        idle: values[3] + values.get(4).copied().unwrap_or(0),
    })
}

/// Busy percentage between two /proc/stat snapshots
pub fn cpu_usage(previous: &CpuTimes, current: &CpuTimes) -> f64 {
    let total = current.total.saturating_sub(previous.total);
    if total == 0 {
        return 0.0;
    }
    let idle = current.idle.saturating_sub(previous.idle);
    (total.saturating_sub(idle) as f64 / total as f64) * 100.0
}

pub fn read_cpu_stat(path: &Path) -> Result<CpuTimes, SampleError> {
    let content = read_file(path)?;
    parse_cpu_stat(&content).ok_or_else(|| parse_error(path, "missing aggregate cpu line"))
}

/// Memory figures from /proc/meminfo, in KiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

impl MemInfo {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        self.used_kb() as f64 / self.total_kb as f64 * 100.0
    }

    pub fn swap_used_kb(&self) -> u64 {
        self.swap_total_kb.saturating_sub(self.swap_free_kb)
    }
}

pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut info = MemInfo::default();
    let mut available = None;
    let mut free = 0;
    let mut buffers = 0;
    let mut cached = 0;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<u64>() else {
            continue;
        };
        match key {
            "MemTotal:" => info.total_kb = value,
            "MemAvailable:" => available = Some(value),
            "MemFree:" => free = value,
            "Buffers:" => buffers = value,
            "Cached:" => cached = value,
            "SwapTotal:" => info.swap_total_kb = value,
            "SwapFree:" => info.swap_free_kb = value,
            _ => {}
        }
    }

    if info.total_kb == 0 {
        return None;
    }
    // Kernels before 3.14 lack MemAvailable
    info.available_kb = available.unwrap_or(free + buffers + cached);
    Some(info)
}

pub fn read_meminfo(path: &Path) -> Result<MemInfo, SampleError> {
    let content = read_file(path)?;
    parse_meminfo(&content).ok_or_else(|| parse_error(path, "missing MemTotal"))
}

/// Block device counters summed over whole disks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskCounters {
    pub reads_completed: u64,
    pub sectors_read: u64,
    pub writes_completed: u64,
    pub sectors_written: u64,
    pub in_flight: u64,
}

/// Whether a diskstats device name is a whole physical disk
///
/// Partitions, loop devices, ramdisks and device-mapper targets are
/// excluded so that no I/O is counted twice.
fn is_whole_disk(name: &str) -> bool {
    if ["loop", "ram", "dm-", "zram", "sr"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        return false;
    }

    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1 is a disk, nvme0n1p2 a partition
        return match name.rfind('p') {
            Some(pos) => {
                let suffix = &name[pos + 1..];
                suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit())
            }
            None => true,
        };
    }

    !name.ends_with(|c: char| c.is_ascii_digit())
}

pub fn parse_diskstats(content: &str) -> DiskCounters {
    let mut counters = DiskCounters::default();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 || !is_whole_disk(fields[2]) {
            continue;
        }
        let field = |i: usize| fields[3 + i].parse::<u64>().unwrap_or(0);
        counters.reads_completed += field(0);
        counters.sectors_read += field(2);
        counters.writes_completed += field(4);
        counters.sectors_written += field(6);
        counters.in_flight += field(8);
    }

    counters
}

pub fn read_diskstats(path: &Path) -> Result<DiskCounters, SampleError> {
    Ok(parse_diskstats(&read_file(path)?))
}

/// Interface byte counters summed over every interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub fn parse_net_dev(content: &str) -> NetCounters {
    let mut counters = NetCounters::default();

    for line in content.lines().skip(2) {
        let Some((_, stats)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<u64> = stats
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 9 {
            continue;
        }
        counters.rx_bytes += fields[0];
        counters.tx_bytes += fields[8];
    }

    counters
}

pub fn read_net_dev(path: &Path) -> Result<NetCounters, SampleError> {
    Ok(parse_net_dev(&read_file(path)?))
}

/// One-minute load average
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

pub fn read_loadavg(path: &Path) -> Result<f64, SampleError> {
    let content = read_file(path)?;
    parse_loadavg(&content).ok_or_else(|| parse_error(path, "missing 1-minute load"))
}

/// Hottest thermal zone in degrees Celsius, if the host exposes any
pub fn read_max_temperature(thermal_root: &Path) -> Option<f64> {
    let entries = fs::read_dir(thermal_root).ok()?;
    entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| fs::read_to_string(e.path().join("temp")).ok())
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .max()
        .map(|milli| milli as f64 / 1000.0)
}
