//! GPUs enumerated from `/sys/class/drm/card*`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::telemetry::metrics::GpuDetail;
use crate::utils::format::{format_size, round2};
use crate::utils::procfs::{read_f64, read_trimmed, read_u64};

pub const VENDOR_INTEL: &str = "0x8086";
pub const VENDOR_AMD: &str = "0x1002";
pub const VENDOR_NVIDIA: &str = "0x10de";

/// Normalize a sysfs PCI id to lowercase `0x`-prefixed form.
pub fn normalize_pci_id(raw: &str) -> String {
    let id = raw.trim().to_lowercase();
    if id.starts_with("0x") {
        id
    } else {
        format!("0x{}", id)
    }
}

/// Look up a device name in a `pci.ids` database.
pub fn lookup_pci_name(ids: &str, vendor: &str, device: &str) -> Option<String> {
    let vendor = vendor.trim_start_matches("0x");
    let device = device.trim_start_matches("0x");
    let mut in_vendor = false;

    for line in ids.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with('\t') {
            in_vendor = line.starts_with(vendor);
            continue;
        }
        if !in_vendor || line.starts_with("\t\t") {
            continue;
        }
        let entry = &line[1..];
        if let Some(name) = entry.strip_prefix(device) {
            let name = name.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Display name: the database name with the vendor prepended when missing,
/// else `Vendor [device]`.
pub fn display_name(vendor: &str, device: &str, known: Option<&str>) -> String {
    let brand = match vendor {
        VENDOR_INTEL => Some("Intel"),
        VENDOR_NVIDIA => Some("NVIDIA"),
        VENDOR_AMD => Some("AMD"),
        _ => None,
    };

    match (known, brand) {
        (Some(name), Some(brand)) if !name.to_lowercase().contains(&brand.to_lowercase()) => {
            format!("{} {}", brand, name)
        }
        (Some(name), _) => name.to_string(),
        (None, Some(brand)) => format!("{} [{}]", brand, device),
        (None, None) => format!("Generic [{}:{}]", vendor, device),
    }
}

/// Active engine clock from `pp_dpm_sclk`, the line marked with `*`.
pub fn parse_dpm_sclk(content: &str) -> Option<f64> {
    let line = content.lines().find(|l| l.contains('*'))?;
    line.split_whitespace().find_map(|part| {
        part.to_lowercase()
            .strip_suffix("mhz")
            .and_then(|v| v.parse().ok())
    })
}

/// `card0`, `card1`; connector entries like `card0-DP-1` are skipped.
fn is_card_dir(name: &str) -> bool {
    name.strip_prefix("card")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn first_hwmon(device: &Path) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(device.join("hwmon"))
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("hwmon"))
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

fn first_value(paths: &[PathBuf]) -> Option<f64> {
    paths.iter().find_map(|p| read_f64(p))
}

fn driver_name(device: &Path) -> Option<String> {
    fs::read_link(device.join("driver"))
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
}

fn pci_address(device: &Path, card: &str) -> String {
    fs::read_link(device)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| card.to_string())
}

fn hwmon_temp(device: &Path) -> f64 {
    first_hwmon(device)
        .and_then(|h| read_f64(&h.join("temp1_input")))
        .map(|milli| round2(milli / 1000.0))
        .unwrap_or(0.0)
}

fn fill_intel(card: &Path, device: &Path, detail: &mut GpuDetail) {
    let candidates = |file: &str| {
        vec![
            card.join("gt").join(file),
            card.join(file),
            device.join("gt").join(file),
        ]
    };

    detail.freq_mhz = first_value(&candidates("gt_cur_freq_mhz")).unwrap_or(0.0);
    let max = first_value(&candidates("gt_max_freq_mhz")).unwrap_or(0.0);
    let act = first_value(&candidates("gt_act_freq_mhz")).unwrap_or(0.0);
    if max > 0.0 && act > 0.0 {
        detail.load_percent = round2((act / max * 100.0).min(100.0));
    }
    detail.temp_c = hwmon_temp(device);
    detail.vram_total = "Shared".to_string();
    detail.vram_used = "Shared".to_string();
}

fn fill_amd(device: &Path, detail: &mut GpuDetail) {
    detail.load_percent = read_f64(&device.join("gpu_busy_percent")).unwrap_or(0.0);
    detail.freq_mhz = fs::read_to_string(device.join("pp_dpm_sclk"))
        .ok()
        .as_deref()
        .and_then(parse_dpm_sclk)
        .unwrap_or(0.0);

    if let Some(hwmon) = first_hwmon(device) {
        if let Some(milli) = read_f64(&hwmon.join("temp1_input")) {
            detail.temp_c = round2(milli / 1000.0);
        }
        if let Some(micro) = read_f64(&hwmon.join("power1_average")) {
            detail.power_w = round2(micro / 1_000_000.0);
        }
    }

    let total = read_u64(&device.join("mem_info_vram_total")).unwrap_or(0);
    let used = read_u64(&device.join("mem_info_vram_used")).unwrap_or(0);
    if total > 0 {
        detail.vram_total = format_size(total);
        detail.vram_used = format_size(used);
        detail.vram_percent = round2(used as f64 / total as f64 * 100.0);
    } else {
        detail.vram_total = "Shared".to_string();
        detail.vram_used = "Shared".to_string();
    }
}

/// Every GPU card below `drm_dir`, indexed from `start_index`.
///
/// `pci_ids` is the text of a `pci.ids` database when one is available.
pub fn scan_drm(drm_dir: &Path, start_index: usize, pci_ids: Option<&str>) -> Vec<GpuDetail> {
    let Ok(entries) = fs::read_dir(drm_dir) else {
        return Vec::new();
    };
    let mut cards: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            is_card_dir(&name).then(|| (name, e.path()))
        })
        .collect();
    cards.sort();

    let mut details = Vec::new();
    for (card_name, card) in cards {
        let device = card.join("device");
        let (vendor, device_id) = match (
            read_trimmed(&device.join("vendor")),
            read_trimmed(&device.join("device")),
        ) {
            (Some(v), Some(d)) => (v, d),
            _ => continue,
        };
        let vendor = normalize_pci_id(&vendor);
        let device_id = normalize_pci_id(&device_id);
        let known = pci_ids.and_then(|ids| lookup_pci_name(ids, &vendor, &device_id));

        let mut detail = GpuDetail {
            index: start_index + details.len(),
            name: display_name(&vendor, &device_id, known.as_deref()),
            vendor: vendor.clone(),
            pci_address: pci_address(&device, &card_name),
            drm_card: card_name.clone(),
            vram_total: "N/A".to_string(),
            vram_used: "N/A".to_string(),
            ..Default::default()
        };

        let driver = driver_name(&device);
        match (driver.as_deref(), vendor.as_str()) {
            (Some("i915") | Some("xe"), _) | (None, VENDOR_INTEL) => {
                fill_intel(&card, &device, &mut detail)
            }
            (Some("amdgpu"), _) | (None, VENDOR_AMD) => fill_amd(&device, &mut detail),
            (Some("nouveau"), _) | (None, VENDOR_NVIDIA) => detail.temp_c = hwmon_temp(&device),
            _ => {}
        }

        details.push(detail);
    }
    details
}
