//! JSON documents holding alert config, rules and history.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{AlertConfig, AlertEvent, AlertRule};
use crate::error::Result;

pub const CONFIG_FILE: &str = "alerts_config.json";
pub const RULES_FILE: &str = "alerts_rules.json";
pub const HISTORY_FILE: &str = "alerts_history.json";

/// Reads and rewrites whole documents under one data directory.
#[derive(Debug, Clone)]
pub struct AlertStore {
    dir: PathBuf,
}

impl AlertStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.dir.join(RULES_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// `Ok(None)` when the document does not exist yet.
    pub fn load_config(&self) -> Result<Option<AlertConfig>> {
        read_json(&self.config_path())
    }

    pub fn save_config(&self, config: &AlertConfig) -> Result<()> {
        write_json(&self.config_path(), config)
    }

    pub fn load_rules(&self) -> Result<Option<Vec<AlertRule>>> {
        read_json(&self.rules_path())
    }

    /// Rules are written sorted by id for stable output.
    pub fn save_rules(&self, rules: &[AlertRule]) -> Result<()> {
        let mut sorted: Vec<&AlertRule> = rules.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        write_json(&self.rules_path(), &sorted)
    }

    pub fn load_history(&self) -> Result<Option<Vec<AlertEvent>>> {
        read_json(&self.history_path())
    }

    pub fn save_history(&self, history: &[AlertEvent]) -> Result<()> {
        write_json(&self.history_path(), &history)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Write through a sibling temp file so a crash never leaves half a document.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
