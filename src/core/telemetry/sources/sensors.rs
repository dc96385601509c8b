use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sysinfo::Components;
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::{FanReading, SensorValue, SensorsReading};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::round2;
use crate::utils::procfs::{read_f64, read_trimmed, read_u64};
use crate::utils::HostFs;

/// Temperatures and fan speeds of every hwmon chip below `hwmon_dir`.
pub fn read_hwmon(hwmon_dir: &Path) -> SensorsReading {
    let mut reading = SensorsReading::default();
    let Ok(entries) = fs::read_dir(hwmon_dir) else {
        return reading;
    };

    let mut chips: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    chips.sort();

    for chip in chips {
        let name = read_trimmed(&chip.join("name")).unwrap_or_else(|| {
            chip.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        let Ok(files) = fs::read_dir(&chip) else {
            continue;
        };
        let mut inputs: Vec<String> = files
            .flatten()
            .filter_map(|f| f.file_name().to_str().map(str::to_string))
            .filter(|f| f.ends_with("_input"))
            .collect();
        inputs.sort();

        for input in inputs {
            let prefix = input.trim_end_matches("_input");
            let label = read_trimmed(&chip.join(format!("{}_label", prefix)))
                .unwrap_or_else(|| prefix.to_string());

            if prefix.starts_with("temp") {
                let Some(milli) = read_f64(&chip.join(&input)) else {
                    continue;
                };
                let milli_opt = |suffix: &str| {
                    read_f64(&chip.join(format!("{}_{}", prefix, suffix)))
                        .map(|v| round2(v / 1000.0))
                        .unwrap_or(0.0)
                };
                reading.sensors.entry(name.clone()).or_default().push(SensorValue {
                    label,
                    current: round2(milli / 1000.0),
                    high: milli_opt("max"),
                    critical: milli_opt("crit"),
                });
            } else if prefix.starts_with("fan") {
                if let Some(rpm) = read_u64(&chip.join(&input)) {
                    reading.fans.push(FanReading { label, rpm });
                }
            }
        }
    }

    reading
}

/// Group sysinfo components by chip: `"coretemp Core 0"` becomes chip
/// `coretemp`, label `Core 0`.
pub fn split_component_label(label: &str) -> (String, String) {
    match label.split_once(' ') {
        Some((chip, rest)) => (chip.to_string(), rest.to_string()),
        None => (label.to_string(), label.to_string()),
    }
}

pub struct SensorsSource {
    fs: HostFs,
    components: Components,
}

impl SensorsSource {
    pub fn new(fs: HostFs) -> Self {
        Self {
            fs,
            components: Components::new_with_refreshed_list(),
        }
    }

    fn from_components(&mut self) -> BTreeMap<String, Vec<SensorValue>> {
        self.components.refresh(true);
        let mut sensors: BTreeMap<String, Vec<SensorValue>> = BTreeMap::new();
        for component in self.components.list() {
            let Some(current) = component.temperature() else {
                continue;
            };
            let (chip, label) = split_component_label(component.label());
            sensors.entry(chip).or_default().push(SensorValue {
                label,
                current: round2(f64::from(current)),
                high: component.max().map(|v| round2(f64::from(v))).unwrap_or(0.0),
                critical: component
                    .critical()
                    .map(|v| round2(f64::from(v)))
                    .unwrap_or(0.0),
            });
        }
        sensors
    }
}

impl MetricSource for SensorsSource {
    type Reading = SensorsReading;

    fn name(&self) -> &'static str {
        "sensors"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<SensorsReading> {
        if cancel.is_cancelled() {
            return None;
        }

        let mut reading = match self.fs.existing_dir("/sys/class/hwmon") {
            Some(dir) => read_hwmon(&dir),
            None => SensorsReading::default(),
        };
        if reading.sensors.is_empty() {
            reading.sensors = self.from_components();
        }
        Some(reading)
    }
}
