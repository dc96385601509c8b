//! Host metric sources backed by procfs, sysfs and sysinfo.

pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod memory;
pub mod net_detail;
pub mod network;
pub mod power;
pub mod process;
pub mod sensors;
pub mod ssh;
pub mod system;

use std::sync::Arc;

pub use cpu::CpuSource;
pub use disk::DiskSource;
pub use gpu::GpuSource;
pub use memory::MemorySource;
pub use net_detail::NetDetailSource;
pub use network::NetworkSource;
pub use power::PowerSource;
pub use process::ProcessSource;
pub use sensors::SensorsSource;
pub use ssh::SshSource;
pub use system::SystemSource;

use super::hub::{AlertSink, HubBuilder, SnapshotHub};
use crate::core::config::Config;

impl HubBuilder {
    /// Register the host sources enabled in `config`. The on-demand topics
    /// are always available.
    pub fn with_host_sources(self, config: &Config) -> Self {
        let fs = config.host_fs.clone();
        let toggles = &config.collectors;
        let mut builder = self;

        if toggles.cpu {
            builder = builder.cpu(CpuSource::new(fs.clone()));
        }
        if toggles.memory {
            builder = builder.memory(MemorySource::new(fs.clone()));
        }
        if toggles.network {
            builder = builder.network(NetworkSource::new());
        }
        if toggles.disk {
            builder = builder.disk(DiskSource::new(fs.clone()));
        }
        if toggles.sensors {
            builder = builder.sensors(SensorsSource::new(fs.clone()));
        }
        if toggles.power {
            builder = builder.power(PowerSource::new(fs.clone()));
        }
        if toggles.gpu {
            builder = builder.gpu(GpuSource::new(fs.clone()));
        }
        if toggles.ssh {
            builder = builder.ssh(SshSource::new(fs.clone()));
        }
        if toggles.system {
            builder = builder.system(SystemSource::new(fs.clone()));
        }

        builder
            .processes(ProcessSource::new(
                config.process_io_refresh,
                config.process_cwd_refresh,
            ))
            .net_detail(NetDetailSource::new(fs))
    }
}

impl SnapshotHub {
    /// Start a hub sampling the host described by `config`.
    pub fn start(config: &Config, alerts: Option<Arc<dyn AlertSink>>) -> Arc<SnapshotHub> {
        let mut builder = SnapshotHub::builder().with_host_sources(config);
        if let Some(sink) = alerts {
            builder = builder.alerts(sink);
        }
        builder.build()
    }
}
