use std::fs;

use chrono::{Duration as ChronoDuration, Utc};
use opswatch::core::alerts::store::{HISTORY_FILE, RULES_FILE};
use opswatch::core::alerts::{AlertManager, AlertStore, HistoryQuery, RuleDraft};
use opswatch::AlertError;
use std::collections::HashMap;
use tempfile::TempDir;

fn draft(id: &str) -> RuleDraft {
    RuleDraft {
        id: id.into(),
        name: format!("Rule {}", id),
        metric: "memory".into(),
        operator: ">=".into(),
        threshold: 75.0,
        duration: "90s".into(),
        ..Default::default()
    }
}

#[test]
fn test_rules_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let manager = AlertManager::open(dir.path());
        manager.create_rule(draft("mem_custom").into_rule().unwrap()).unwrap();
        manager.enable_preset("essential").unwrap();
    }

    let manager = AlertManager::open(dir.path());
    let rules = manager.rules();
    assert_eq!(rules.len(), 9);
    let custom = manager.rule("mem_custom").unwrap();
    assert_eq!(custom.threshold, 75.0);
    assert_eq!(custom.duration, "90s");
    assert!(!custom.builtin);
    assert!(manager.rule("cpu_high").unwrap().enabled);
    assert!(!manager.rule("cpu_warning").unwrap().enabled);
}

#[test]
fn test_missing_builtins_are_restored() {
    let dir = TempDir::new().unwrap();
    let store = AlertStore::new(dir.path());
    store
        .save_rules(&[draft("only_custom").into_rule().unwrap()])
        .unwrap();

    let manager = AlertManager::open(dir.path());
    assert_eq!(manager.rules().len(), 9);
    assert!(manager.rule("swap_high").unwrap().builtin);
}

#[test]
fn test_corrupt_documents_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(RULES_FILE), "[{broken").unwrap();
    fs::write(dir.path().join(HISTORY_FILE), "not json").unwrap();

    let manager = AlertManager::open(dir.path());
    assert_eq!(manager.rules().len(), 8);
    assert_eq!(manager.history(&HistoryQuery::default()).total, 0);
    assert!(!manager.config().enabled);
}

#[test]
fn test_builtin_cannot_be_removed() {
    let dir = TempDir::new().unwrap();
    let manager = AlertManager::open(dir.path());
    manager.delete_rule("disk_high").unwrap();
    assert!(manager.rule("disk_high").is_ok());

    manager.create_rule(draft("gone").into_rule().unwrap()).unwrap();
    manager.delete_rule("gone").unwrap();
    assert_eq!(manager.rule("gone"), Err(AlertError::RuleNotFound));
    assert_eq!(manager.delete_rule("gone"), Err(AlertError::RuleNotFound));

    let reopened = AlertManager::open(dir.path());
    assert!(reopened.rule("gone").is_err());
}

#[test]
fn test_saved_documents_are_stable() {
    let dir = TempDir::new().unwrap();
    let manager = AlertManager::open(dir.path());
    manager.update_config(Default::default());
    manager.enable_rule("cpu_high").unwrap();
    manager.update_config(opswatch::core::alerts::AlertConfig {
        enabled: true,
        ..Default::default()
    });

    let t0 = Utc::now();
    let values = HashMap::from([("cpu".to_string(), 99.0)]);
    manager.check_at(&values, t0);
    manager.check_at(&values, t0 + ChronoDuration::seconds(60));

    let store = manager.store();
    let history_bytes = fs::read(store.history_path()).unwrap();
    let rules_bytes = fs::read(store.rules_path()).unwrap();
    let config_bytes = fs::read(store.config_path()).unwrap();

    let history = store.load_history().unwrap().unwrap();
    store.save_history(&history).unwrap();
    let rules = store.load_rules().unwrap().unwrap();
    store.save_rules(&rules).unwrap();
    let config = store.load_config().unwrap().unwrap();
    store.save_config(&config).unwrap();

    assert_eq!(history_bytes, fs::read(store.history_path()).unwrap());
    assert_eq!(rules_bytes, fs::read(store.rules_path()).unwrap());
    assert_eq!(config_bytes, fs::read(store.config_path()).unwrap());
}
