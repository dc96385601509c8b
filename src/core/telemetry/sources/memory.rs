use std::collections::HashMap;

use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::{MemInfo, MemoryReading, SwapInfo};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::{format_size, round2};
use crate::utils::HostFs;

const PAGE_SIZE: u64 = 4096;

/// `/proc/meminfo` as a key to bytes map.
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let mut parts = rest.split_whitespace();
            let value: u64 = parts.next()?.parse().ok()?;
            let bytes = match parts.next() {
                Some("kB") => value * 1024,
                _ => value,
            };
            Some((key.trim().to_string(), bytes))
        })
        .collect()
}

/// Swap-in and swap-out page counters from `/proc/vmstat`.
pub fn parse_vmstat_swap(content: &str) -> (u64, u64) {
    let mut sin = 0;
    let mut sout = 0;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next().and_then(|v| v.parse::<u64>().ok())) {
            (Some("pswpin"), Some(v)) => sin = v,
            (Some("pswpout"), Some(v)) => sout = v,
            _ => {}
        }
    }
    (sin, sout)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 / total as f64 * 100.0)
    }
}

/// Build the memory and swap sections from parsed meminfo.
pub fn memory_from_meminfo(info: &HashMap<String, u64>, swap_pages: (u64, u64)) -> MemoryReading {
    let get = |key: &str| info.get(key).copied().unwrap_or(0);

    let total = get("MemTotal");
    let free = get("MemFree");
    let buffers = get("Buffers");
    let cached = get("Cached") + get("SReclaimable");
    let available = info
        .get("MemAvailable")
        .copied()
        .unwrap_or(free + buffers + cached);
    let used = total.saturating_sub(free + buffers + cached);

    let swap_total = get("SwapTotal");
    let swap_free = get("SwapFree");
    let swap_used = swap_total.saturating_sub(swap_free);

    MemoryReading {
        memory: MemInfo {
            total: format_size(total),
            used: format_size(used),
            free: format_size(free),
            percent: percent(used, total),
            available: format_size(available),
            buffers: format_size(buffers),
            cached: format_size(cached),
            shared: format_size(get("Shmem")),
            active: format_size(get("Active")),
            inactive: format_size(get("Inactive")),
            slab: format_size(get("Slab")),
            history: Vec::new(),
        },
        swap: SwapInfo {
            total: format_size(swap_total),
            used: format_size(swap_used),
            free: format_size(swap_free),
            percent: percent(swap_used, swap_total),
            sin: format_size(swap_pages.0 * PAGE_SIZE),
            sout: format_size(swap_pages.1 * PAGE_SIZE),
        },
    }
}

pub struct MemorySource {
    fs: HostFs,
    system: System,
}

impl MemorySource {
    pub fn new(fs: HostFs) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        Self { fs, system }
    }

    fn from_sdk(&mut self) -> MemoryReading {
        self.system.refresh_memory();
        let s = &self.system;

        let total = s.total_memory();
        let used = s.used_memory();
        let swap_total = s.total_swap();
        let swap_used = s.used_swap();

        MemoryReading {
            memory: MemInfo {
                total: format_size(total),
                used: format_size(used),
                free: format_size(s.free_memory()),
                percent: percent(used, total),
                available: format_size(s.available_memory()),
                ..Default::default()
            },
            swap: SwapInfo {
                total: format_size(swap_total),
                used: format_size(swap_used),
                free: format_size(s.free_swap()),
                percent: percent(swap_used, swap_total),
                sin: format_size(0),
                sout: format_size(0),
            },
        }
    }
}

impl MetricSource for MemorySource {
    type Reading = MemoryReading;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<MemoryReading> {
        if cancel.is_cancelled() {
            return None;
        }

        let swap_pages = self
            .fs
            .read_to_string("/proc/vmstat")
            .map(|c| parse_vmstat_swap(&c))
            .unwrap_or((0, 0));

        match self.fs.read_to_string("/proc/meminfo") {
            Ok(content) => {
                let info = parse_meminfo(&content);
                if info.get("MemTotal").copied().unwrap_or(0) > 0 {
                    return Some(memory_from_meminfo(&info, swap_pages));
                }
                Some(self.from_sdk())
            }
            Err(e) => {
                log::debug!("meminfo unavailable, using sysinfo: {}", e);
                Some(self.from_sdk())
            }
        }
    }
}
