use std::collections::{BTreeMap, HashSet};

use sysinfo::Networks;
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::{InterfaceInfo, ListeningPort, NetDetailReading};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::format_size;
use crate::utils::procfs::{
    parse_socket_table, read_trimmed, tcp_state_name, SocketEntry, TCP_LISTEN, TCP_TIME_WAIT,
};
use crate::utils::HostFs;

const IFF_UP: u64 = 0x1;

/// Counters of one `/proc/net/dev` row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevCounters {
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
}

pub fn parse_net_dev(content: &str) -> BTreeMap<String, DevCounters> {
    content
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let values: Vec<u64> = rest
                .split_whitespace()
                .map(|v| v.parse().unwrap_or(0))
                .collect();
            if values.len() < 12 {
                return None;
            }
            Some((
                name.trim().to_string(),
                DevCounters {
                    rx_bytes: values[0],
                    rx_errors: values[2],
                    rx_drops: values[3],
                    tx_bytes: values[8],
                    tx_errors: values[10],
                    tx_drops: values[11],
                },
            ))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct SocketSummary {
    pub sockets: BTreeMap<String, u64>,
    pub connection_states: BTreeMap<String, u64>,
    pub listening_ports: Vec<ListeningPort>,
}

/// Socket counts, TCP state histogram and listening ports. TCP listeners come
/// first; UDP ports are appended when not already listed.
pub fn summarize_sockets(tcp: &[SocketEntry], udp: &[SocketEntry]) -> SocketSummary {
    let mut summary = SocketSummary::default();
    summary.sockets.insert("tcp".to_string(), tcp.len() as u64);
    summary.sockets.insert("udp".to_string(), udp.len() as u64);
    summary.sockets.insert(
        "tcp_tw".to_string(),
        tcp.iter().filter(|s| s.state == TCP_TIME_WAIT).count() as u64,
    );

    for entry in tcp {
        *summary
            .connection_states
            .entry(tcp_state_name(entry.state).to_string())
            .or_insert(0) += 1;
    }

    let mut seen = HashSet::new();
    for entry in tcp.iter().filter(|s| s.state == TCP_LISTEN) {
        if entry.local_port > 0 && seen.insert(entry.local_port) {
            summary.listening_ports.push(ListeningPort {
                port: entry.local_port,
                protocol: "tcp".to_string(),
            });
        }
    }
    for entry in udp {
        if entry.local_port > 0 && seen.insert(entry.local_port) {
            summary.listening_ports.push(ListeningPort {
                port: entry.local_port,
                protocol: "udp".to_string(),
            });
        }
    }

    summary
}

/// Interface, socket and listening-port detail. Only sampled while a
/// subscriber asks for `net_detail`.
pub struct NetDetailSource {
    fs: HostFs,
    networks: Networks,
}

impl NetDetailSource {
    pub fn new(fs: HostFs) -> Self {
        Self {
            fs,
            networks: Networks::new_with_refreshed_list(),
        }
    }

    fn socket_table(&self, names: &[&str]) -> Vec<SocketEntry> {
        names
            .iter()
            .filter_map(|name| self.fs.read_to_string(&format!("/proc/net/{}", name)).ok())
            .flat_map(|content| parse_socket_table(&content))
            .collect()
    }

    fn interface_flags_up(&self, name: &str) -> Option<bool> {
        let raw = read_trimmed(&self.fs.host_path(&format!("/sys/class/net/{}/flags", name)))?;
        let flags = u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()?;
        Some(flags & IFF_UP != 0)
    }

    fn interface_speed(&self, name: &str) -> f64 {
        read_trimmed(&self.fs.host_path(&format!("/sys/class/net/{}/speed", name)))
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|s| *s > 0.0)
            .unwrap_or(0.0)
    }

    fn interfaces(&mut self) -> BTreeMap<String, InterfaceInfo> {
        self.networks.refresh(true);

        let dev = self
            .fs
            .read_to_string("/proc/net/dev")
            .map(|c| parse_net_dev(&c))
            .unwrap_or_default();

        let mut names: Vec<String> = dev.keys().cloned().collect();
        if names.is_empty() {
            names = self.networks.list().keys().cloned().collect();
        }

        names
            .into_iter()
            .map(|name| {
                let sdk = self.networks.list().get(&name);
                let counters = dev.get(&name).copied().unwrap_or_else(|| DevCounters {
                    rx_bytes: sdk.map_or(0, |d| d.total_received()),
                    rx_errors: sdk.map_or(0, |d| d.total_errors_on_received()),
                    tx_bytes: sdk.map_or(0, |d| d.total_transmitted()),
                    tx_errors: sdk.map_or(0, |d| d.total_errors_on_transmitted()),
                    ..Default::default()
                });
                let ip = sdk
                    .and_then(|d| d.ip_networks().first().map(|n| n.addr.to_string()))
                    .unwrap_or_default();
                let is_up = self.interface_flags_up(&name).unwrap_or(sdk.is_some());

                let info = InterfaceInfo {
                    ip,
                    bytes_sent: format_size(counters.tx_bytes),
                    bytes_recv: format_size(counters.rx_bytes),
                    raw_sent: counters.tx_bytes,
                    raw_recv: counters.rx_bytes,
                    speed: self.interface_speed(&name),
                    is_up,
                    errors_in: counters.rx_errors,
                    errors_out: counters.tx_errors,
                    drops_in: counters.rx_drops,
                    drops_out: counters.tx_drops,
                };
                (name, info)
            })
            .collect()
    }
}

impl MetricSource for NetDetailSource {
    type Reading = NetDetailReading;

    fn name(&self) -> &'static str {
        "net_detail"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<NetDetailReading> {
        if cancel.is_cancelled() {
            return None;
        }

        let interfaces = self.interfaces();
        let errors = BTreeMap::from([
            ("total_errors_in".to_string(), interfaces.values().map(|i| i.errors_in).sum()),
            ("total_errors_out".to_string(), interfaces.values().map(|i| i.errors_out).sum()),
            ("total_drops_in".to_string(), interfaces.values().map(|i| i.drops_in).sum()),
            ("total_drops_out".to_string(), interfaces.values().map(|i| i.drops_out).sum()),
        ]);

        if cancel.is_cancelled() {
            return None;
        }

        let tcp = self.socket_table(&["tcp", "tcp6"]);
        let udp = self.socket_table(&["udp", "udp6"]);
        let summary = summarize_sockets(&tcp, &udp);

        Some(NetDetailReading {
            interfaces,
            sockets: summary.sockets,
            connection_states: summary.connection_states,
            errors,
            listening_ports: summary.listening_ports,
        })
    }
}
