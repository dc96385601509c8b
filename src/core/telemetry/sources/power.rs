use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::PowerReading;
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::round2;
use crate::utils::procfs::{read_f64, read_trimmed, read_u64};
use crate::utils::HostFs;

/// Energy consumed between two counter readings, handling one wrap of the
/// counter at `max_range`.
pub fn energy_delta(last: u64, current: u64, max_range: Option<u64>) -> u64 {
    if current >= last {
        current - last
    } else {
        match max_range {
            Some(max) if max > 0 => max.saturating_sub(last) + current,
            _ => 0,
        }
    }
}

/// Battery or adapter draw in watts: `power_now` (µW), else
/// `voltage_now` (µV) times `current_now` (µA).
pub fn supply_watts(supply_dir: &Path) -> Option<f64> {
    let Ok(entries) = fs::read_dir(supply_dir) else {
        return None;
    };
    let mut supplies: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    supplies.sort();

    for supply in supplies {
        if let Some(micro_watts) = read_f64(&supply.join("power_now")) {
            return Some(round2(micro_watts / 1_000_000.0));
        }
        if let (Some(volts), Some(amps)) = (
            read_f64(&supply.join("voltage_now")),
            read_f64(&supply.join("current_now")),
        ) {
            return Some(round2(volts * amps / 1e12));
        }
    }
    None
}

pub struct PowerSource {
    fs: HostFs,
    last_energy: HashMap<PathBuf, u64>,
    last_at: Option<Instant>,
}

impl PowerSource {
    pub fn new(fs: HostFs) -> Self {
        Self {
            fs,
            last_energy: HashMap::new(),
            last_at: None,
        }
    }

    /// Per-domain watts since the previous call, keyed by domain name.
    fn rapl(&mut self, now: Instant) -> BTreeMap<String, f64> {
        let mut domains = BTreeMap::new();
        let Some(base) = self.fs.existing_dir("/sys/class/powercap") else {
            return domains;
        };
        let Ok(entries) = fs::read_dir(&base) else {
            return domains;
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("intel-rapl:"))
            })
            .collect();
        paths.sort();

        let elapsed = self
            .last_at
            .map(|at| now.saturating_duration_since(at).as_secs_f64());
        let mut any = false;

        for domain in paths {
            let Some(name) = read_trimmed(&domain.join("name")) else {
                continue;
            };
            let Some(energy) = read_u64(&domain.join("energy_uj")) else {
                continue;
            };
            any = true;

            let last = self.last_energy.insert(domain.clone(), energy);
            if let (Some(last), Some(dt)) = (last, elapsed) {
                if dt <= 0.0 {
                    continue;
                }
                let max_range = read_u64(&domain.join("max_energy_range_uj"));
                let delta = energy_delta(last, energy, max_range);
                if delta > 0 {
                    let watts = (delta as f64 / 1_000_000.0) / dt;
                    domains.insert(name, round2(watts.max(0.0)));
                }
            }
        }

        if any {
            self.last_at = Some(now);
        }
        domains
    }
}

impl MetricSource for PowerSource {
    type Reading = PowerReading;

    fn name(&self) -> &'static str {
        "power"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<PowerReading> {
        if cancel.is_cancelled() {
            return None;
        }

        let mut reading = PowerReading {
            consumption_watts: self
                .fs
                .existing_dir("/sys/class/power_supply")
                .and_then(|dir| supply_watts(&dir)),
            rapl: None,
        };

        let domains = self.rapl(Instant::now());
        if reading.consumption_watts.is_none() {
            let package: f64 = domains
                .iter()
                .filter(|(name, _)| name.to_lowercase().starts_with("package"))
                .map(|(_, w)| *w)
                .sum();
            if package > 0.0 {
                reading.consumption_watts = Some(round2(package));
            }
        }
        if !domains.is_empty() {
            reading.rapl = Some(domains);
        }

        Some(reading)
    }
}
