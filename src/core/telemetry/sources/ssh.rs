//! SSH daemon overview: listener status, live sessions, auth tallies, host
//! key fingerprint and the memory footprint of `sshd`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sysinfo::{MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio_util::sync::CancellationToken;

use super::system::parse_btime;
use crate::core::telemetry::metrics::{ProcessInfo, SshAuthMethods, SshSession, SshStats};
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::round2;
use crate::utils::procfs::{parse_socket_table, SocketEntry, TCP_ESTABLISHED, TCP_LISTEN};
use crate::utils::HostFs;

/// Full SSH scans are expensive; results are reused this long.
pub const SSH_CACHE_TTL: Duration = Duration::from_secs(120);
const SSH_PORT: u16 = 22;
const UTMP_RECORD_SIZE: usize = 384;
const UTMP_USER_PROCESS: i32 = 7;
const HOST_KEYS: [&str; 3] = [
    "/etc/ssh/ssh_host_ed25519_key.pub",
    "/etc/ssh/ssh_host_rsa_key.pub",
    "/etc/ssh/ssh_host_ecdsa_key.pub",
];

/// `sshd[pid]: Accepted <method> ...` or one of the failure forms.
static AUTH_EVENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"\bsshd(?:\[\d+\])?:\s+(?:Accepted (?P<method>\S+)|(?P<failed>Failed password|Connection closed by authenticating user))",
    )
    .ok()
});

/// Incremental reader of the auth log. Only newline-terminated lines are
/// consumed; a truncated file restarts from the beginning.
#[derive(Debug, Default)]
pub struct AuthLogScanner {
    offset: u64,
    counts: SshAuthMethods,
}

impl AuthLogScanner {
    pub fn counts(&self) -> &SshAuthMethods {
        &self.counts
    }

    pub fn scan(&mut self, path: &Path) {
        let Ok(mut file) = File::open(path) else {
            return;
        };
        let Ok(meta) = file.metadata() else {
            return;
        };
        if meta.len() < self.offset {
            log::debug!("auth log truncated, rescanning {}", path.display());
            self.offset = 0;
        }
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return;
        }

        let mut buf = Vec::new();
        if file.read_to_end(&mut buf).is_err() {
            return;
        }
        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return;
        };

        for line in buf[..last_newline].split(|b| *b == b'\n') {
            self.tally(&String::from_utf8_lossy(line));
        }
        self.offset += last_newline as u64 + 1;
    }

    fn tally(&mut self, line: &str) {
        let Some(caps) = AUTH_EVENT.as_ref().and_then(|re| re.captures(line)) else {
            return;
        };
        match caps.name("method").map(|m| m.as_str()) {
            Some("publickey") => self.counts.publickey += 1,
            Some("password") => self.counts.password += 1,
            Some(_) => self.counts.other += 1,
            None if caps.name("failed").is_some() => self.counts.failed += 1,
            None => {}
        }
    }
}

/// `SHA256:<base64> (TYPE)` for an OpenSSH public key line.
pub fn key_fingerprint(pubkey: &str) -> Option<String> {
    let mut parts = pubkey.split_whitespace();
    let key_type = parts.next()?;
    let body = STANDARD.decode(parts.next()?).ok()?;
    let digest = Sha256::digest(&body);

    let type_name = if key_type.contains("ed25519") {
        "ED25519".to_string()
    } else if key_type.contains("rsa") {
        "RSA".to_string()
    } else if key_type.contains("ecdsa") {
        "ECDSA".to_string()
    } else {
        key_type.trim_start_matches("ssh-").to_uppercase()
    };

    Some(format!("SHA256:{} ({})", STANDARD_NO_PAD.encode(digest), type_name))
}

/// User of an `sshd: user@pts/N` or `sshd: user@notty` session process.
pub fn parse_sshd_user(arg0: &str) -> Option<String> {
    let rest = arg0.strip_prefix("sshd:")?.trim();
    if rest.contains("[priv]") || rest.contains("[listener]") {
        return None;
    }
    if !rest.contains("@pts/") && !rest.contains("@notty") {
        return None;
    }
    let (user, _) = rest.split_once('@')?;
    let user = user.trim();
    (!user.is_empty()).then(|| user.to_string())
}

/// Remote peers of established inbound SSH connections, by socket inode.
pub fn ssh_peers_by_inode(sockets: &[SocketEntry]) -> HashMap<u64, IpAddr> {
    let mut peers = HashMap::new();
    for s in sockets {
        if s.local_port == SSH_PORT && s.state == TCP_ESTABLISHED && s.inode != 0 {
            peers.entry(s.inode).or_insert(s.remote_ip);
        }
    }
    peers
}

/// Remote login sessions recorded in a utmp file.
pub fn parse_utmp(data: &[u8]) -> Vec<SshSession> {
    let text = |bytes: &[u8]| {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).to_string()
    };

    data.chunks_exact(UTMP_RECORD_SIZE)
        .filter_map(|record| {
            let ut_type = i32::from_le_bytes(record[0..4].try_into().ok()?);
            if ut_type != UTMP_USER_PROCESS {
                return None;
            }
            let user = text(&record[44..76]);
            let host = text(&record[76..332]);
            let ip_text = match host.find(':') {
                Some(idx) if idx > 0 => &host[..idx],
                _ => host.as_str(),
            };
            let ip: IpAddr = ip_text.parse().ok()?;
            if ip.is_loopback() {
                return None;
            }
            let secs = i32::from_le_bytes(record[340..344].try_into().ok()?);
            Some(SshSession {
                user,
                ip: ip.to_string(),
                started: rfc3339(i64::from(secs)),
            })
        })
        .collect()
}

/// `starttime` (clock ticks since boot) of a `/proc/<pid>/stat` line.
pub fn parse_stat_start_ticks(stat: &str) -> Option<u64> {
    let after = &stat[stat.rfind(')')? + 1..];
    after.split_whitespace().nth(19)?.parse().ok()
}

fn rfc3339(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[cfg(unix)]
fn clock_ticks() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[cfg(not(unix))]
fn clock_ticks() -> u64 {
    100
}

pub struct SshSource {
    fs: HostFs,
    system: System,
    auth: AuthLogScanner,
    cached: Option<(Instant, SshStats)>,
}

impl SshSource {
    pub fn new(fs: HostFs) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self {
            fs,
            system,
            auth: AuthLogScanner::default(),
            cached: None,
        }
    }

    fn tcp_sockets(&self) -> Vec<SocketEntry> {
        ["/proc/net/tcp", "/proc/net/tcp6"]
            .iter()
            .filter_map(|p| self.fs.read_to_string(p).ok())
            .flat_map(|c| parse_socket_table(&c))
            .collect()
    }

    fn boot_time(&self) -> Option<i64> {
        parse_btime(&self.fs.read_to_string("/proc/stat").ok()?)
    }

    /// Sessions of `sshd` child processes whose sockets match an inbound peer.
    fn sessions_from_proc(&self, peers: &HashMap<u64, IpAddr>) -> Vec<SshSession> {
        if peers.is_empty() {
            return Vec::new();
        }
        let Some(proc_dir) = self.fs.existing_dir("/proc") else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(&proc_dir) else {
            return Vec::new();
        };
        let boot = self.boot_time();
        let ticks = clock_ticks();

        let mut sessions: BTreeMap<(String, String, String), SshSession> = BTreeMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().filter(|n| n.bytes().all(|b| b.is_ascii_digit()))
            else {
                continue;
            };
            let pid_dir = proc_dir.join(pid);

            let Ok(cmdline) = fs::read(pid_dir.join("cmdline")) else {
                continue;
            };
            let arg0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
            let Some(user) = parse_sshd_user(String::from_utf8_lossy(arg0).trim()) else {
                continue;
            };

            let Some(ip) = socket_peer(&pid_dir, peers) else {
                continue;
            };
            if ip.is_loopback() {
                continue;
            }

            let started = boot
                .zip(
                    fs::read_to_string(pid_dir.join("stat"))
                        .ok()
                        .as_deref()
                        .and_then(parse_stat_start_ticks),
                )
                .map(|(boot, start)| rfc3339(boot + (start / ticks) as i64))
                .unwrap_or_else(|| rfc3339(Utc::now().timestamp()));

            let key = (user.clone(), ip.to_string(), started.clone());
            sessions.entry(key).or_insert(SshSession {
                user,
                ip: ip.to_string(),
                started,
            });
        }
        sessions.into_values().collect()
    }

    fn sessions_from_utmp(&self) -> Vec<SshSession> {
        for candidate in self.fs.candidates("/var/run/utmp") {
            if let Ok(data) = fs::read(&candidate) {
                let sessions = parse_utmp(&data);
                if !sessions.is_empty() {
                    return sessions;
                }
            }
        }
        Vec::new()
    }

    fn host_key_fingerprint(&self) -> String {
        HOST_KEYS
            .iter()
            .filter_map(|p| self.fs.read_to_string(p).ok())
            .find_map(|content| key_fingerprint(content.trim()))
            .unwrap_or_default()
    }

    fn known_hosts_size(&self) -> usize {
        let mut files = vec![self.fs.host_path("/root/.ssh/known_hosts")];
        if let Some(home) = self.fs.existing_dir("/home") {
            if let Ok(entries) = fs::read_dir(home) {
                let mut users: Vec<_> = entries
                    .flatten()
                    .map(|e| e.path().join(".ssh/known_hosts"))
                    .collect();
                users.sort();
                files.extend(users);
            }
        }

        files
            .iter()
            .filter_map(|f| fs::read_to_string(f).ok())
            .map(|c| c.trim().lines().filter(|l| !l.trim().is_empty()).count())
            .find(|n| *n > 0)
            .unwrap_or(0)
    }

    fn sshd_memory(&mut self) -> (Vec<ProcessInfo>, f64) {
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let total = self.system.total_memory();
        if total == 0 {
            return (Vec::new(), 0.0);
        }

        let mut risky = Vec::new();
        let mut sum = 0.0;
        for (pid, process) in self.system.processes() {
            if process.name() != "sshd" {
                continue;
            }
            let percent = process.memory() as f64 / total as f64 * 100.0;
            if percent > 1.0 {
                risky.push(ProcessInfo {
                    pid: pid.as_u32(),
                    name: "sshd".to_string(),
                    memory_percent: (percent * 10.0).floor() / 10.0,
                    ..Default::default()
                });
            }
            sum += percent;
        }
        (risky, round2(sum))
    }

    fn scan(&mut self, cancel: &CancellationToken) -> Option<SshStats> {
        let sockets = self.tcp_sockets();
        let mut stats = SshStats::default();
        if sockets
            .iter()
            .any(|s| s.local_port == SSH_PORT && s.state == TCP_LISTEN)
        {
            stats.status = "Running".to_string();
        }

        let peers = ssh_peers_by_inode(&sockets);
        stats.sessions = self.sessions_from_proc(&peers);
        if stats.sessions.is_empty() {
            stats.sessions = self.sessions_from_utmp();
        }
        stats.connections = if stats.sessions.is_empty() {
            sockets
                .iter()
                .filter(|s| s.local_port == SSH_PORT && s.state == TCP_ESTABLISHED)
                .count()
        } else {
            stats.sessions.len()
        };

        if cancel.is_cancelled() {
            return None;
        }

        self.auth.scan(&self.fs.host_path("/var/log/auth.log"));
        stats.auth_methods = self.auth.counts().clone();
        stats.failed_logins = stats.auth_methods.failed;
        stats.hostkey_fingerprint = self.host_key_fingerprint();
        stats.history_size = self.known_hosts_size();

        let (risky, memory) = self.sshd_memory();
        stats.oom_risk_processes = risky;
        stats.ssh_process_memory = memory;

        Some(stats)
    }
}

impl MetricSource for SshSource {
    type Reading = SshStats;

    fn name(&self) -> &'static str {
        "ssh"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<SshStats> {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some((at, stats)) = &self.cached {
            if at.elapsed() < SSH_CACHE_TTL {
                return Some(stats.clone());
            }
        }

        let stats = self.scan(cancel)?;
        self.cached = Some((Instant::now(), stats.clone()));
        Some(stats)
    }
}

/// First peer address among the process's socket file descriptors.
fn socket_peer(pid_dir: &Path, peers: &HashMap<u64, IpAddr>) -> Option<IpAddr> {
    let fds = fs::read_dir(pid_dir.join("fd")).ok()?;
    fds.flatten().find_map(|fd| {
        let link = fs::read_link(fd.path()).ok()?;
        let link = link.to_str()?;
        let inode: u64 = link
            .strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()?;
        peers.get(&inode).copied()
    })
}
