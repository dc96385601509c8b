//! GPU metrics.
//!
//! NVIDIA devices come from NVML when the `nvml` feature is built in; every
//! other card (and NVIDIA without NVML) is read from `/sys/class/drm`.

pub mod drm;
#[cfg(feature = "nvml")]
mod nvidia;

#[cfg(feature = "nvml")]
pub use nvidia::NvmlBackend;

use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::GpuDetail;
use crate::core::telemetry::source::MetricSource;
use crate::utils::HostFs;

use drm::{scan_drm, VENDOR_NVIDIA};

const PCI_IDS_PATHS: &[&str] = &[
    "/usr/share/hwdata/pci.ids",
    "/usr/share/pci.ids",
    "/usr/share/misc/pci.ids",
];

/// NVML results first, then DRM cards not already covered by NVML.
pub fn merge_devices(nvml: Vec<GpuDetail>, drm: Vec<GpuDetail>) -> Vec<GpuDetail> {
    let have_nvml = !nvml.is_empty();
    let mut merged = nvml;
    merged.extend(
        drm.into_iter()
            .filter(|g| !(have_nvml && g.vendor == VENDOR_NVIDIA)),
    );
    for (index, gpu) in merged.iter_mut().enumerate() {
        gpu.index = index;
    }
    merged
}

pub struct GpuSource {
    fs: HostFs,
    pci_ids: Option<String>,
    #[cfg(feature = "nvml")]
    nvml: Option<NvmlBackend>,
}

impl GpuSource {
    pub fn new(fs: HostFs) -> Self {
        let pci_ids = PCI_IDS_PATHS
            .iter()
            .find_map(|path| fs.read_to_string(path).ok());

        #[cfg(feature = "nvml")]
        let nvml = match NvmlBackend::new() {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::debug!("{}, using DRM only", e);
                None
            }
        };

        Self {
            fs,
            pci_ids,
            #[cfg(feature = "nvml")]
            nvml,
        }
    }

    #[cfg(feature = "nvml")]
    fn nvml_devices(&self) -> Vec<GpuDetail> {
        self.nvml
            .as_ref()
            .map(|backend| backend.collect(&self.fs))
            .unwrap_or_default()
    }

    #[cfg(not(feature = "nvml"))]
    fn nvml_devices(&self) -> Vec<GpuDetail> {
        Vec::new()
    }
}

impl MetricSource for GpuSource {
    type Reading = Vec<GpuDetail>;

    fn name(&self) -> &'static str {
        "gpu"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<Vec<GpuDetail>> {
        if cancel.is_cancelled() {
            return None;
        }
        let nvml = self.nvml_devices();
        let drm = match self.fs.existing_dir("/sys/class/drm") {
            Some(dir) => scan_drm(&dir, nvml.len(), self.pci_ids.as_deref()),
            None => Vec::new(),
        };
        Some(merge_devices(nvml, drm))
    }
}
