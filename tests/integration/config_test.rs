use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use opswatch::core::alerts::AlertManager;
use opswatch::Config;
use tempfile::TempDir;

fn config_with(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(move |key| vars.get(key).cloned())
}

#[test]
fn test_host_fs_prefix_is_read_first() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("proc")).unwrap();
    fs::write(temp_dir.path().join("proc/uptime"), "123.45 678.90\n").unwrap();

    let config = config_with(&[("HOST_FS", temp_dir.path().to_str().unwrap())]);
    assert_eq!(
        config.host_path("/proc/uptime"),
        temp_dir.path().join("proc/uptime")
    );
    let content = config.host_fs.read_to_string("/proc/uptime").unwrap();
    assert!(content.starts_with("123.45"));
}

#[test]
fn test_data_dir_backs_alert_store() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("state");

    let config = config_with(&[("DATA_DIR", data_dir.to_str().unwrap())]);
    assert_eq!(config.data_dir, data_dir);

    let manager = AlertManager::open(&config.data_dir);
    manager.enable_rule("cpu_high").unwrap();
    assert!(config.data_dir.join("alerts_rules.json").is_file());
}

#[test]
fn test_blank_values_use_defaults() {
    let config = config_with(&[
        ("DATA_DIR", "  "),
        ("OPSWATCH_LISTEN", ""),
        ("OPSWATCH_TOKEN", ""),
    ]);
    let defaults = Config::default();
    assert_eq!(config.data_dir, defaults.data_dir);
    assert_eq!(config.listen, "0.0.0.0:8000");
    assert!(config.token.is_none());
}

#[test]
fn test_collectors_can_be_disabled() {
    let config = config_with(&[
        ("ENABLE_CPU", "false"),
        ("ENABLE_POWER", "0"),
        ("ENABLE_NETWORK", "maybe"),
    ]);
    assert!(!config.collectors.cpu);
    assert!(!config.collectors.power);
    // Anything that is not an explicit yes turns the collector off.
    assert!(!config.collectors.network);
    assert!(config.collectors.memory);
}

#[test]
fn test_origin_list_and_token() {
    let config = config_with(&[
        ("WS_ALLOWED_ORIGINS", "http://dash.local:3000/,*"),
        ("OPSWATCH_TOKEN", "s3cret"),
        ("OPSWATCH_LISTEN", "127.0.0.1:9100"),
    ]);
    assert_eq!(
        config.allowed_origins,
        vec!["http://dash.local:3000".to_string(), "*".to_string()]
    );
    assert_eq!(config.token.as_deref(), Some("s3cret"));
    assert_eq!(config.listen, "127.0.0.1:9100");
    assert_eq!(config.host_path("/sys"), PathBuf::from("/hostfs/sys"));
}
