use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::struct_wrappers::device::ProcessInfo as NvmlProcess;
use nvml_wrapper::{Device, Nvml};
use once_cell::sync::Lazy;

use super::drm::VENDOR_NVIDIA;
use crate::core::telemetry::metrics::{GpuDetail, GpuProcess};
use crate::error::{MonitorError, Result};
use crate::utils::format::{format_size, round2};
use crate::utils::HostFs;

/// NVML may only be initialized once per process.
static NVML: Lazy<std::result::Result<Nvml, String>> =
    Lazy::new(|| Nvml::init().map_err(|e| e.to_string()));

/// NVIDIA GPUs through NVML
pub struct NvmlBackend {
    nvml: &'static Nvml,
}

impl NvmlBackend {
    /// Borrow the shared NVML handle; fails when the driver library is absent.
    pub fn new() -> Result<Self> {
        match &*NVML {
            Ok(nvml) => Ok(Self { nvml }),
            Err(e) => Err(MonitorError::gpu_not_available(format!(
                "Failed to init NVML: {}",
                e
            ))),
        }
    }

    pub fn collect(&self, fs: &HostFs) -> Vec<GpuDetail> {
        let count = match self.nvml.device_count() {
            Ok(count) => count,
            Err(e) => {
                log::debug!("NVML device count failed: {}", e);
                return Vec::new();
            }
        };

        (0..count)
            .filter_map(|index| match self.nvml.device_by_index(index) {
                Ok(device) => Some(describe(&device, index as usize, fs)),
                Err(e) => {
                    log::debug!("NVML device {} unavailable: {}", index, e);
                    None
                }
            })
            .collect()
    }
}

fn describe(device: &Device<'_>, index: usize, fs: &HostFs) -> GpuDetail {
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown".to_string());
    let pci_address = device.pci_info().map(|p| p.bus_id).unwrap_or_default();

    let mut detail = GpuDetail {
        index,
        name: format!("NVIDIA {}", name.trim_start_matches("NVIDIA ")),
        vendor: VENDOR_NVIDIA.to_string(),
        pci_address,
        drm_card: format!("card{}", index),
        vram_total: "N/A".to_string(),
        vram_used: "N/A".to_string(),
        ..Default::default()
    };

    if let Ok(memory) = device.memory_info() {
        detail.vram_total = format_size(memory.total);
        detail.vram_used = format_size(memory.used);
        if memory.total > 0 {
            detail.vram_percent = round2(memory.used as f64 / memory.total as f64 * 100.0);
        }
    }
    if let Ok(util) = device.utilization_rates() {
        detail.load_percent = f64::from(util.gpu);
    }
    if let Ok(temp) = device.temperature(TemperatureSensor::Gpu) {
        detail.temp_c = f64::from(temp);
    }
    if let Ok(milli_watts) = device.power_usage() {
        detail.power_w = round2(f64::from(milli_watts) / 1000.0);
    }
    if let Ok(mhz) = device.clock_info(Clock::Graphics) {
        detail.freq_mhz = f64::from(mhz);
    }

    let compute = device.running_compute_processes().unwrap_or_default();
    let graphics = device.running_graphics_processes().unwrap_or_default();
    for process in compute.iter().chain(graphics.iter()) {
        if detail.processes.iter().any(|p| p.pid == process.pid) {
            continue;
        }
        detail.processes.push(gpu_process(process, fs));
    }

    detail
}

fn gpu_process(process: &NvmlProcess, fs: &HostFs) -> GpuProcess {
    let name = fs
        .read_to_string(&format!("/proc/{}/comm", process.pid))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let vram_used = match process.used_gpu_memory {
        UsedGpuMemory::Used(bytes) => format_size(bytes),
        UsedGpuMemory::Unavailable => "N/A".to_string(),
    };
    GpuProcess {
        pid: process.pid,
        name,
        vram_used,
    }
}
