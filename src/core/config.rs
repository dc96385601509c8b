use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::utils::duration::parse_seconds_or_duration;
use crate::utils::procfs::HostFs;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_PROCESS_IO_REFRESH: Duration = Duration::from_secs(30);
pub const DEFAULT_PROCESS_CWD_REFRESH: Duration = Duration::from_secs(60);

/// Which always-on collectors to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorToggles {
    pub cpu: bool,
    pub memory: bool,
    pub network: bool,
    pub disk: bool,
    pub sensors: bool,
    pub power: bool,
    pub gpu: bool,
    pub ssh: bool,
    pub system: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            network: true,
            disk: true,
            sensors: true,
            power: true,
            gpu: true,
            ssh: true,
            system: true,
        }
    }
}

/// Runtime configuration, resolved from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host_fs: HostFs,
    pub data_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub process_io_refresh: Duration,
    pub process_cwd_refresh: Duration,
    pub collectors: CollectorToggles,
    pub listen: String,
    /// Shared secret accepted on the push channel and the management API
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_fs: HostFs::new("/hostfs"),
            data_dir: default_data_dir(),
            allowed_origins: Vec::new(),
            process_io_refresh: DEFAULT_PROCESS_IO_REFRESH,
            process_cwd_refresh: DEFAULT_PROCESS_CWD_REFRESH,
            collectors: CollectorToggles::default(),
            listen: DEFAULT_LISTEN.to_string(),
            token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let host_fs = match lookup("HOST_FS") {
            Some(root) => HostFs::new(root),
            None => defaults.host_fs,
        };

        let data_dir = lookup("DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let allowed_origins = lookup("WS_ALLOWED_ORIGINS")
            .map(|v| parse_origin_list(&v))
            .unwrap_or_default();

        let process_io_refresh = refresh_from(
            lookup("PROCESS_IO_REFRESH"),
            "PROCESS_IO_REFRESH",
            DEFAULT_PROCESS_IO_REFRESH,
        );
        let process_cwd_refresh = refresh_from(
            lookup("PROCESS_CWD_REFRESH"),
            "PROCESS_CWD_REFRESH",
            DEFAULT_PROCESS_CWD_REFRESH,
        );

        let flag = |key: &str| env_bool(lookup(key).as_deref(), true);
        let collectors = CollectorToggles {
            cpu: flag("ENABLE_CPU"),
            memory: flag("ENABLE_MEMORY"),
            network: flag("ENABLE_NETWORK"),
            disk: flag("ENABLE_DISK"),
            sensors: flag("ENABLE_SENSORS"),
            power: flag("ENABLE_POWER"),
            gpu: flag("ENABLE_GPU"),
            ssh: flag("ENABLE_SSH"),
            system: flag("ENABLE_SYSTEM"),
        };

        let listen = lookup("OPSWATCH_LISTEN")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.listen);

        let token = lookup("OPSWATCH_TOKEN").filter(|v| !v.is_empty());

        Self {
            host_fs,
            data_dir,
            allowed_origins,
            process_io_refresh,
            process_cwd_refresh,
            collectors,
            listen,
            token,
        }
    }

    /// Checks required before serving: a token, a `host:port` listen address
    /// and a data directory that is not a regular file.
    pub fn validate(&self) -> Result<()> {
        if self.token.is_none() {
            return Err(MonitorError::config(
                "an authentication token is required (set OPSWATCH_TOKEN or pass --token)",
            ));
        }

        let valid_listen = self
            .listen
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_listen {
            return Err(MonitorError::config(format!(
                "invalid listen address {:?}, expected host:port",
                self.listen
            )));
        }

        if self.data_dir.is_file() {
            return Err(MonitorError::config(format!(
                "data directory {} is a file",
                self.data_dir.display()
            )));
        }
        Ok(())
    }

    /// Join an absolute path under the host filesystem prefix.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.host_fs.host_path(path)
    }
}

fn default_data_dir() -> PathBuf {
    if Path::new("/data").is_dir() {
        PathBuf::from("/data")
    } else {
        PathBuf::from("./data")
    }
}

fn refresh_from(raw: Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
        return default;
    };
    match parse_seconds_or_duration(&raw) {
        Ok(d) if !d.is_zero() => d,
        _ => {
            log::warn!("Ignoring invalid {}={:?}, using {:?}", key, raw, default);
            default
        }
    }
}

fn env_bool(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        None => default,
    }
}

/// Comma-separated origins, trimmed, trailing slashes removed.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}
