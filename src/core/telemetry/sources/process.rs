use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use sysinfo::{
    MemoryRefreshKind, Process, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
    ThreadKind, UpdateKind, Users,
};
use tokio_util::sync::CancellationToken;

use crate::core::config::{DEFAULT_PROCESS_CWD_REFRESH, DEFAULT_PROCESS_IO_REFRESH};
use crate::core::telemetry::metrics::ProcessInfo;
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::{format_age, format_size, round2};

/// Attributes that never change for a PID, plus the coarse-cadence ones.
#[derive(Debug, Clone)]
struct CachedProcess {
    name: String,
    username: String,
    cmdline: String,
    start_time: u64,
    ppid: u32,
    io: Option<(u64, u64)>,
    cwd: Option<String>,
}

/// Whether a refresh last done at `last` is due again at `now`.
pub fn refresh_due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    last.map_or(true, |at| now.saturating_duration_since(at) >= every)
}

/// Heaviest memory users first.
pub fn sort_by_memory(processes: &mut [ProcessInfo]) {
    processes.sort_by(|a, b| {
        b.memory_percent
            .partial_cmp(&a.memory_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(unix)]
fn uid_label(uid: &sysinfo::Uid) -> String {
    format!("uid:{}", **uid)
}

#[cfg(not(unix))]
fn uid_label(uid: &sysinfo::Uid) -> String {
    format!("uid:{:?}", uid)
}

/// Process table sampled only while a subscriber asks for `processes`.
pub struct ProcessSource {
    system: System,
    users: Users,
    cache: HashMap<u32, CachedProcess>,
    io_every: Duration,
    cwd_every: Duration,
    last_io: Option<Instant>,
    last_cwd: Option<Instant>,
}

impl ProcessSource {
    pub fn new(io_every: Duration, cwd_every: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self {
            system,
            users: Users::new_with_refreshed_list(),
            cache: HashMap::new(),
            io_every,
            cwd_every,
            last_io: None,
            last_cwd: None,
        }
    }

    pub fn cached_pids(&self) -> usize {
        self.cache.len()
    }

    fn username(&self, process: &Process) -> String {
        match process.user_id() {
            Some(uid) => self
                .users
                .get_user_by_id(uid)
                .map(|u| u.name().to_string())
                .unwrap_or_else(|| uid_label(uid)),
            None => "unknown".to_string(),
        }
    }

    fn cache_entry(&self, process: &Process) -> CachedProcess {
        let cmdline = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        CachedProcess {
            name: process.name().to_string_lossy().to_string(),
            username: self.username(process),
            cmdline,
            start_time: process.start_time(),
            ppid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
            io: None,
            cwd: None,
        }
    }
}

impl Default for ProcessSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_IO_REFRESH, DEFAULT_PROCESS_CWD_REFRESH)
    }
}

impl MetricSource for ProcessSource {
    type Reading = Vec<ProcessInfo>;

    fn name(&self) -> &'static str {
        "processes"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<Vec<ProcessInfo>> {
        if cancel.is_cancelled() {
            return None;
        }

        let now = Instant::now();
        let io_due = refresh_due(self.last_io, self.io_every, now);
        let cwd_due = refresh_due(self.last_cwd, self.cwd_every, now);

        let mut kind = ProcessRefreshKind::nothing()
            .with_cpu()
            .with_memory()
            .with_tasks()
            .with_user(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet);
        if io_due {
            kind = kind.with_disk_usage();
        }
        if cwd_due {
            kind = kind.with_cwd(UpdateKind::Always);
        }

        self.system.refresh_memory();
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, kind);

        if cancel.is_cancelled() {
            return None;
        }

        let total_memory = self.system.total_memory();
        let wall = chrono::Utc::now().timestamp();
        let mut seen = HashSet::new();
        let mut result = Vec::with_capacity(self.system.processes().len());

        for (pid, process) in self.system.processes() {
            if matches!(process.thread_kind(), Some(ThreadKind::Userland)) {
                continue;
            }
            let pid = pid.as_u32();
            seen.insert(pid);

            if !self.cache.contains_key(&pid) {
                let entry = self.cache_entry(process);
                self.cache.insert(pid, entry);
            }
            let Some(entry) = self.cache.get_mut(&pid) else {
                continue;
            };

            if io_due {
                let usage = process.disk_usage();
                entry.io = Some((usage.total_read_bytes, usage.total_written_bytes));
            }
            if cwd_due {
                entry.cwd = process
                    .cwd()
                    .map(|p| p.display().to_string())
                    .filter(|s| !s.is_empty());
            }

            let memory_percent = if total_memory > 0 {
                round2(process.memory() as f64 / total_memory as f64 * 100.0)
            } else {
                0.0
            };
            let num_threads = process
                .tasks()
                .map(|t| t.len().max(1) as u32)
                .unwrap_or(1);
            let (io_read, io_write) = match entry.io {
                Some((r, w)) => (format_size(r), format_size(w)),
                None => ("-".to_string(), "-".to_string()),
            };

            result.push(ProcessInfo {
                pid,
                name: entry.name.clone(),
                username: entry.username.clone(),
                num_threads,
                memory_percent,
                cpu_percent: round2(f64::from(process.cpu_usage())),
                ppid: entry.ppid,
                uptime: format_age(wall - entry.start_time as i64),
                cmdline: entry.cmdline.clone(),
                cwd: entry.cwd.clone().unwrap_or_else(|| "-".to_string()),
                io_read,
                io_write,
            });
        }

        self.cache.retain(|pid, _| seen.contains(pid));
        if io_due {
            self.last_io = Some(now);
        }
        if cwd_due {
            self.last_cwd = Some(now);
        }

        sort_by_memory(&mut result);
        Some(result)
    }
}
