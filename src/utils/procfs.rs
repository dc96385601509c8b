//! Host-aware access to `/proc`, `/sys` and friends.
//!
//! When the service runs in a container the host filesystem is mounted under a
//! prefix (`/hostfs` by default). Readers try the prefixed path first and then
//! the plain one.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct HostFs {
    root: Option<PathBuf>,
    fallback: bool,
}

impl HostFs {
    /// Prefix paths with `root`, falling back to the plain path. An empty root
    /// disables prefixing.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            root: if root.as_os_str().is_empty() {
                None
            } else {
                Some(root)
            },
            fallback: true,
        }
    }

    /// Read only below `root`, never from the running host.
    pub fn isolated<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
            fallback: false,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Join `path` under the host prefix unless it already carries it.
    pub fn host_path(&self, path: &str) -> PathBuf {
        match &self.root {
            None => PathBuf::from(path),
            Some(root) => {
                let candidate = Path::new(path);
                if candidate.starts_with(root) {
                    candidate.to_path_buf()
                } else {
                    root.join(path.trim_start_matches('/'))
                }
            }
        }
    }

    /// Paths to try, in order.
    pub fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let mut out = vec![self.host_path(path)];
        if self.fallback && self.root.is_some() {
            out.push(PathBuf::from(path));
        }
        out
    }

    pub fn read_to_string(&self, path: &str) -> io::Result<String> {
        let mut last_err = None;
        for candidate in self.candidates(path) {
            match fs::read_to_string(&candidate) {
                Ok(content) => return Ok(content),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound)))
    }

    /// First existing directory among the candidates.
    pub fn existing_dir(&self, path: &str) -> Option<PathBuf> {
        self.candidates(path).into_iter().find(|p| p.is_dir())
    }
}

/// Read a sysfs-style file holding one trimmed value.
pub fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

pub fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path)?.parse().ok()
}

pub fn read_f64(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse().ok()
}

/// One row of `/proc/net/{tcp,tcp6,udp,udp6}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub state: u8,
    pub inode: u64,
}

pub const TCP_ESTABLISHED: u8 = 0x01;
pub const TCP_TIME_WAIT: u8 = 0x06;
pub const TCP_LISTEN: u8 = 0x0A;
/// UDP sockets bound without a peer report this state.
pub const UDP_UNCONNECTED: u8 = 0x07;

pub fn tcp_state_name(state: u8) -> &'static str {
    match state {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}

/// Parse a socket table; the header line and malformed rows are skipped.
pub fn parse_socket_table(content: &str) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(parse_socket_line)
        .collect()
}

fn parse_socket_line(line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (local_ip, local_port) = parse_endpoint(fields[1])?;
    let (remote_ip, remote_port) = parse_endpoint(fields[2])?;
    let state = u8::from_str_radix(fields[3], 16).ok()?;
    let inode = fields[9].parse().unwrap_or(0);

    Some(SocketEntry {
        local_ip,
        local_port,
        remote_ip,
        remote_port,
        state,
        inode,
    })
}

/// `0100007F:0016` -> `127.0.0.1:22`. Addresses are stored as host-order
/// 32-bit words, which on Linux means little-endian.
fn parse_endpoint(raw: &str) -> Option<(IpAddr, u16)> {
    let (addr, port) = raw.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.swap_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            let v6 = Ipv6Addr::from(octets);
            match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            }
        }
        _ => return None,
    };
    Some((ip, port))
}
