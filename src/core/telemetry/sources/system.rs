use sysinfo::System;
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::SystemReading;
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::format_local_timestamp;
use crate::utils::HostFs;

/// `btime` of `/proc/stat`, in unix seconds.
pub fn parse_btime(stat: &str) -> Option<i64> {
    stat.lines()
        .find_map(|l| l.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

pub struct SystemSource {
    fs: HostFs,
}

impl SystemSource {
    pub fn new(fs: HostFs) -> Self {
        Self { fs }
    }
}

impl MetricSource for SystemSource {
    type Reading = SystemReading;

    fn name(&self) -> &'static str {
        "system"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<SystemReading> {
        if cancel.is_cancelled() {
            return None;
        }
        let boot = self
            .fs
            .read_to_string("/proc/stat")
            .ok()
            .as_deref()
            .and_then(parse_btime)
            .unwrap_or_else(|| System::boot_time() as i64);

        Some(SystemReading {
            boot_time: format_local_timestamp(boot),
        })
    }
}
