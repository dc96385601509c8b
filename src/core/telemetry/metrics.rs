//! Reading shapes produced by the metric sources.
//!
//! Every collection type defaults to empty so a reading that was never
//! sampled still serializes without nulls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuFreq {
    pub avg: f64,
    pub per_core: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuDetail {
    pub model: String,
    pub architecture: String,
    pub cores: usize,
    pub threads: usize,
    pub max_freq: f64,
    pub min_freq: f64,
}

impl Default for CpuDetail {
    fn default() -> Self {
        Self {
            model: "Unknown".to_string(),
            architecture: String::new(),
            cores: 0,
            threads: 0,
            max_freq: 0.0,
            min_freq: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    pub percent: f64,
    pub per_core: Vec<f64>,
    pub load_avg: Vec<f64>,
    pub freq: CpuFreq,
    pub info: CpuDetail,
    /// Share of jiffies per state over the last interval, summing to ~100
    pub times: BTreeMap<String, f64>,
    pub stats: BTreeMap<String, u64>,
    pub temp_history: Vec<f64>,
    pub percent_history: Vec<f64>,
}

impl CpuReading {
    /// Load average at index 0/1/2, zero when unknown.
    pub fn load(&self, idx: usize) -> f64 {
        self.load_avg.get(idx).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemInfo {
    pub total: String,
    pub used: String,
    pub free: String,
    pub percent: f64,
    pub available: String,
    pub buffers: String,
    pub cached: String,
    pub shared: String,
    pub active: String,
    pub inactive: String,
    pub slab: String,
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub total: String,
    pub used: String,
    pub free: String,
    pub percent: f64,
    pub sin: String,
    pub sout: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub memory: MemInfo,
    pub swap: SwapInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: String,
    pub used: String,
    pub free: String,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InodeInfo {
    pub mountpoint: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIoInfo {
    pub read_bytes: String,
    pub write_bytes: String,
    pub read_count: u64,
    pub write_count: u64,
    pub read_time: u64,
    pub write_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskReading {
    pub disks: Vec<DiskInfo>,
    pub inodes: Vec<InodeInfo>,
    pub io: BTreeMap<String, DiskIoInfo>,
}

impl DiskReading {
    pub fn max_percent(&self) -> f64 {
        self.disks.iter().map(|d| d.percent).fold(0.0, f64::max)
    }
}

/// Aggregated byte counters across every interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub bytes_sent: String,
    pub bytes_recv: String,
    pub raw_sent: u64,
    pub raw_recv: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub ip: String,
    pub bytes_sent: String,
    pub bytes_recv: String,
    pub raw_sent: u64,
    pub raw_recv: u64,
    pub speed: f64,
    pub is_up: bool,
    pub errors_in: u64,
    pub errors_out: u64,
    pub drops_in: u64,
    pub drops_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningPort {
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDetailReading {
    pub interfaces: BTreeMap<String, InterfaceInfo>,
    pub sockets: BTreeMap<String, u64>,
    pub connection_states: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub listening_ports: Vec<ListeningPort>,
}

/// The `network` section of a snapshot: basic counters plus topic-gated detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInfo {
    pub bytes_sent: String,
    pub bytes_recv: String,
    pub raw_sent: u64,
    pub raw_recv: u64,
    pub interfaces: BTreeMap<String, InterfaceInfo>,
    pub sockets: BTreeMap<String, u64>,
    pub connection_states: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub listening_ports: Vec<ListeningPort>,
}

impl NetInfo {
    pub fn apply_basic(&mut self, basic: &NetworkReading) {
        self.bytes_sent = basic.bytes_sent.clone();
        self.bytes_recv = basic.bytes_recv.clone();
        self.raw_sent = basic.raw_sent;
        self.raw_recv = basic.raw_recv;
    }

    pub fn apply_detail(&mut self, detail: &NetDetailReading) {
        self.interfaces = detail.interfaces.clone();
        self.sockets = detail.sockets.clone();
        self.connection_states = detail.connection_states.clone();
        self.errors = detail.errors.clone();
        self.listening_ports = detail.listening_ports.clone();
    }

    pub fn clear_detail(&mut self) {
        self.interfaces.clear();
        self.sockets.clear();
        self.connection_states.clear();
        self.errors.clear();
        self.listening_ports.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    pub label: String,
    pub current: f64,
    pub high: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanReading {
    pub label: String,
    pub rpm: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorsReading {
    pub sensors: BTreeMap<String, Vec<SensorValue>>,
    pub fans: Vec<FanReading>,
}

impl SensorsReading {
    /// Mean of every positive `current` temperature, 0 when none.
    pub fn average_temperature(&self) -> f64 {
        let (sum, count) = self
            .sensors
            .values()
            .flatten()
            .filter(|s| s.current > 0.0)
            .fold((0.0, 0u32), |(sum, count), s| (sum + s.current, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / f64::from(count)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumption_watts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rapl: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub name: String,
    pub vram_used: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuDetail {
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub pci_address: String,
    pub drm_card: String,
    pub vram_total: String,
    pub vram_used: String,
    pub vram_percent: f64,
    pub freq_mhz: f64,
    pub temp_c: f64,
    pub power_w: f64,
    pub load_percent: f64,
    pub processes: Vec<GpuProcess>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub username: String,
    pub num_threads: u32,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub ppid: u32,
    pub uptime: String,
    pub cmdline: String,
    pub cwd: String,
    pub io_read: String,
    pub io_write: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshSession {
    pub user: String,
    pub ip: String,
    pub started: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshAuthMethods {
    pub publickey: u64,
    pub password: u64,
    pub other: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshStats {
    pub status: String,
    pub connections: usize,
    pub sessions: Vec<SshSession>,
    pub auth_methods: SshAuthMethods,
    pub hostkey_fingerprint: String,
    pub history_size: usize,
    pub oom_risk_processes: Vec<ProcessInfo>,
    pub failed_logins: u64,
    pub ssh_process_memory: f64,
}

impl Default for SshStats {
    fn default() -> Self {
        Self {
            status: "Stopped".to_string(),
            connections: 0,
            sessions: Vec::new(),
            auth_methods: SshAuthMethods::default(),
            hostkey_fingerprint: String::new(),
            history_size: 0,
            oom_risk_processes: Vec::new(),
            failed_logins: 0,
            ssh_process_memory: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemReading {
    pub boot_time: String,
}
