use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::{DiskInfo, DiskIoInfo, DiskReading, InodeInfo};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::{format_size, round2};
use crate::utils::HostFs;

/// Usage probes are expensive; successful results are reused this long.
pub const USAGE_CACHE_TTL: Duration = Duration::from_secs(10);
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// Filesystem capacity as reported by `statvfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsUsage {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub inodes_total: u64,
    pub inodes_free: u64,
}

/// Filesystem types the kernel marks `nodev` in `/proc/filesystems`.
pub fn parse_nodev_filesystems(content: &str) -> HashSet<String> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nodev"), Some(fs)) => Some(fs.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Physical partitions from a mounts table. Loop devices and squashfs are skipped.
pub fn parse_partitions(mounts: &str, nodev: &HashSet<String>) -> Vec<Partition> {
    let mut seen = HashSet::new();
    mounts
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mountpoint = parts.next()?.replace("\\040", " ");
            let fstype = parts.next()?;
            if device.contains("loop") || fstype == "squashfs" || nodev.contains(fstype) {
                return None;
            }
            if device == "none" || !seen.insert(mountpoint.clone()) {
                return None;
            }
            Some(Partition {
                device: device.to_string(),
                mountpoint,
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Per-device IO counters from `/proc/diskstats`.
pub fn parse_diskstats(content: &str) -> BTreeMap<String, DiskIoInfo> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 11 {
                return None;
            }
            let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
            Some((
                fields[2].to_string(),
                DiskIoInfo {
                    read_count: num(3),
                    read_bytes: format_size(num(5) * SECTOR_SIZE),
                    read_time: num(6),
                    write_count: num(7),
                    write_bytes: format_size(num(9) * SECTOR_SIZE),
                    write_time: num(10),
                },
            ))
        })
        .collect()
}

#[cfg(unix)]
pub fn fs_usage(path: &Path) -> Option<FsUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return None;
    }

    let block = stat.f_frsize as u64;
    Some(FsUsage {
        total: stat.f_blocks as u64 * block,
        free: stat.f_bfree as u64 * block,
        available: stat.f_bavail as u64 * block,
        inodes_total: stat.f_files as u64,
        inodes_free: stat.f_ffree as u64,
    })
}

#[cfg(not(unix))]
pub fn fs_usage(path: &Path) -> Option<FsUsage> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|d| d.mount_point() == path)
        .map(|d| FsUsage {
            total: d.total_space(),
            free: d.available_space(),
            available: d.available_space(),
            ..Default::default()
        })
}

/// Usage entries for one partition. Percent follows `df`: used over used plus available.
pub fn usage_entries(part: &Partition, usage: FsUsage) -> (DiskInfo, Option<InodeInfo>) {
    let used = usage.total.saturating_sub(usage.free);
    let denom = used + usage.available;
    let percent = if denom > 0 {
        round2(used as f64 / denom as f64 * 100.0)
    } else {
        0.0
    };

    let disk = DiskInfo {
        device: part.device.clone(),
        mountpoint: part.mountpoint.clone(),
        fstype: part.fstype.clone(),
        total: format_size(usage.total),
        used: format_size(used),
        free: format_size(usage.available),
        percent,
    };

    let inodes = (usage.inodes_total > 0).then(|| {
        let used = usage.inodes_total.saturating_sub(usage.inodes_free);
        InodeInfo {
            mountpoint: part.mountpoint.clone(),
            total: usage.inodes_total,
            used,
            free: usage.inodes_free,
            percent: round2(used as f64 / usage.inodes_total as f64 * 100.0),
        }
    });

    (disk, inodes)
}

struct UsageCache {
    disks: Vec<DiskInfo>,
    inodes: Vec<InodeInfo>,
    taken_at: Instant,
}

pub struct DiskSource {
    fs: HostFs,
    cache: Option<UsageCache>,
}

impl DiskSource {
    pub fn new(fs: HostFs) -> Self {
        Self { fs, cache: None }
    }

    fn probe_usage(&self, cancel: &CancellationToken) -> Option<(Vec<DiskInfo>, Vec<InodeInfo>)> {
        let nodev = self
            .fs
            .read_to_string("/proc/filesystems")
            .map(|c| parse_nodev_filesystems(&c))
            .unwrap_or_default();
        let mounts = self
            .fs
            .read_to_string("/proc/1/mounts")
            .or_else(|_| self.fs.read_to_string("/proc/mounts"))
            .ok()?;

        let mut disks = Vec::new();
        let mut inodes = Vec::new();
        for part in parse_partitions(&mounts, &nodev) {
            if cancel.is_cancelled() {
                return None;
            }
            let Some(usage) = fs_usage(&self.fs.host_path(&part.mountpoint)) else {
                continue;
            };
            let (disk, inode) = usage_entries(&part, usage);
            disks.push(disk);
            inodes.extend(inode);
        }
        Some((disks, inodes))
    }
}

impl MetricSource for DiskSource {
    type Reading = DiskReading;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<DiskReading> {
        if cancel.is_cancelled() {
            return None;
        }

        let stale = self
            .cache
            .as_ref()
            .map_or(true, |c| c.taken_at.elapsed() > USAGE_CACHE_TTL);
        if stale {
            if let Some((disks, inodes)) = self.probe_usage(cancel) {
                self.cache = Some(UsageCache {
                    disks,
                    inodes,
                    taken_at: Instant::now(),
                });
            }
        }

        let mut reading = DiskReading::default();
        if let Some(cache) = &self.cache {
            reading.disks = cache.disks.clone();
            reading.inodes = cache.inodes.clone();
        }
        if let Ok(content) = self.fs.read_to_string("/proc/diskstats") {
            reading.io = parse_diskstats(&content);
        }

        if cancel.is_cancelled() {
            return None;
        }
        Some(reading)
    }
}
