use std::collections::BTreeMap;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::{CpuDetail, CpuFreq, CpuReading};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::round2;
use crate::utils::procfs::read_u64;
use crate::utils::HostFs;

/// Columns of the aggregate `cpu` line in `/proc/stat`.
const JIFFY_COLUMNS: [&str; 10] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal", "guest", "guest_nice",
];
/// States reported in the `times` breakdown.
const REPORTED_STATES: [&str; 6] = ["user", "system", "idle", "iowait", "irq", "softirq"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub jiffies: Vec<u64>,
    pub ctx_switches: u64,
    pub interrupts: u64,
    pub soft_interrupts: u64,
}

/// Parse the aggregate counters of `/proc/stat`.
pub fn parse_proc_stat(content: &str) -> Option<ProcStat> {
    let mut stat = ProcStat::default();
    let mut seen_cpu = false;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let first_value = |mut it: std::str::SplitWhitespace<'_>| {
            it.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0)
        };
        match fields.next() {
            Some("cpu") => {
                stat.jiffies = fields.filter_map(|v| v.parse().ok()).collect();
                seen_cpu = true;
            }
            Some("ctxt") => stat.ctx_switches = first_value(fields),
            Some("intr") => stat.interrupts = first_value(fields),
            Some("softirq") => stat.soft_interrupts = first_value(fields),
            _ => {}
        }
    }

    seen_cpu.then_some(stat)
}

/// Share of each reported state over the jiffies elapsed since `prev`,
/// normalised to 100. Without a previous sample the counters since boot are used.
pub fn times_breakdown(prev: Option<&[u64]>, current: &[u64]) -> BTreeMap<String, f64> {
    let delta: Vec<u64> = current
        .iter()
        .enumerate()
        .map(|(i, v)| match prev.and_then(|p| p.get(i)) {
            Some(old) => v.saturating_sub(*old),
            None => *v,
        })
        .collect();
    let total: u64 = delta.iter().sum();

    REPORTED_STATES
        .iter()
        .map(|state| {
            let idx = JIFFY_COLUMNS.iter().position(|c| c == state).unwrap_or(0);
            let value = delta.get(idx).copied().unwrap_or(0);
            let share = if total > 0 {
                round2(value as f64 / total as f64 * 100.0)
            } else {
                0.0
            };
            (state.to_string(), share)
        })
        .collect()
}

/// Model name and per-core `cpu MHz` values from `/proc/cpuinfo`.
pub fn parse_cpuinfo(content: &str) -> (Option<String>, Vec<f64>) {
    let mut model = None;
    let mut freqs = Vec::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key == "model name" && model.is_none() && !value.is_empty() {
            model = Some(value.to_string());
        } else if key == "cpu MHz" {
            if let Ok(mhz) = value.parse::<f64>() {
                freqs.push(round2(mhz));
            }
        }
    }

    (model, freqs)
}

pub struct CpuSource {
    fs: HostFs,
    system: System,
    prev_jiffies: Option<Vec<u64>>,
    detail: Option<CpuDetail>,
}

impl CpuSource {
    pub fn new(fs: HostFs) -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        system.refresh_cpu_all();

        Self {
            fs,
            system,
            prev_jiffies: None,
            detail: None,
        }
    }

    fn detail(&mut self, cpuinfo_model: Option<&str>) -> CpuDetail {
        if let Some(detail) = &self.detail {
            return detail.clone();
        }

        let cpus = self.system.cpus();
        let model = cpuinfo_model
            .map(str::to_string)
            .or_else(|| {
                cpus.first()
                    .map(|c| c.brand().trim().to_string())
                    .filter(|b| !b.is_empty())
            })
            .unwrap_or_else(|| "Unknown".to_string());

        let khz = |file: &str| {
            read_u64(&self.fs.host_path(&format!(
                "/sys/devices/system/cpu/cpu0/cpufreq/{}",
                file
            )))
            .map(|v| round2(v as f64 / 1000.0))
            .unwrap_or(0.0)
        };

        let detail = CpuDetail {
            model,
            architecture: System::cpu_arch(),
            cores: System::physical_core_count().unwrap_or(cpus.len()),
            threads: cpus.len(),
            max_freq: khz("cpuinfo_max_freq"),
            min_freq: khz("cpuinfo_min_freq"),
        };
        self.detail = Some(detail.clone());
        detail
    }
}

impl MetricSource for CpuSource {
    type Reading = CpuReading;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<CpuReading> {
        if cancel.is_cancelled() {
            return None;
        }
        self.system.refresh_cpu_all();

        let mut reading = CpuReading {
            percent: round2(f64::from(self.system.global_cpu_usage())),
            per_core: self
                .system
                .cpus()
                .iter()
                .map(|c| round2(f64::from(c.cpu_usage())))
                .collect(),
            ..Default::default()
        };

        let load = System::load_average();
        reading.load_avg = vec![round2(load.one), round2(load.five), round2(load.fifteen)];

        let (model, mut freqs) = match self.fs.read_to_string("/proc/cpuinfo") {
            Ok(content) => parse_cpuinfo(&content),
            Err(_) => (None, Vec::new()),
        };
        if freqs.is_empty() {
            freqs = self
                .system
                .cpus()
                .iter()
                .map(|c| c.frequency() as f64)
                .filter(|f| *f > 0.0)
                .collect();
        }
        if !freqs.is_empty() {
            let avg = freqs.iter().sum::<f64>() / freqs.len() as f64;
            reading.freq = CpuFreq {
                avg: round2(avg),
                per_core: freqs,
            };
        }
        reading.info = self.detail(model.as_deref());

        if cancel.is_cancelled() {
            return None;
        }

        if let Some(stat) = self
            .fs
            .read_to_string("/proc/stat")
            .ok()
            .as_deref()
            .and_then(parse_proc_stat)
        {
            reading.times = times_breakdown(self.prev_jiffies.as_deref(), &stat.jiffies);
            reading.stats = BTreeMap::from([
                ("ctx_switches".to_string(), stat.ctx_switches),
                ("interrupts".to_string(), stat.interrupts),
                ("soft_interrupts".to_string(), stat.soft_interrupts),
                ("syscalls".to_string(), 0),
            ]);
            self.prev_jiffies = Some(stat.jiffies);
        }

        Some(reading)
    }
}
