use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use opswatch::core::alerts::{
    AlertConfig, AlertEvent, AlertManager, AlertStatus, HistoryQuery, NotificationChannel,
    RuleDraft,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;

fn cpu(value: f64) -> HashMap<String, f64> {
    HashMap::from([("cpu".to_string(), value)])
}

fn manager_with_rule(dir: &TempDir, channels: Vec<NotificationChannel>) -> AlertManager {
    let manager = AlertManager::open(dir.path());
    manager.update_config(AlertConfig {
        enabled: true,
        channels,
        ..AlertConfig::default()
    });
    let rule = RuleDraft {
        id: "cpu_80".into(),
        name: "CPU above 80".into(),
        metric: "cpu".into(),
        operator: ">".into(),
        threshold: 80.0,
        duration: "2m".into(),
        severity: "critical".into(),
        enabled: true,
        ..Default::default()
    }
    .into_rule()
    .unwrap();
    manager.create_rule(rule).unwrap();
    manager
}

async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn events(manager: &AlertManager) -> Vec<AlertEvent> {
    manager.history(&HistoryQuery::default()).events
}

#[tokio::test]
async fn test_fires_after_sustain_and_resolves() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_rule(&dir, Vec::new());

    let t0 = Utc::now();
    for step in 0..4 {
        manager.check_at(&cpu(90.0), t0 + ChronoDuration::seconds(30 * step));
        assert!(events(&manager).is_empty(), "fired early at step {}", step);
    }
    manager.check_at(&cpu(90.0), t0 + ChronoDuration::seconds(120));

    let history = events(&manager);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AlertStatus::Firing);
    assert_eq!(history[0].rule_id, "cpu_80");

    assert!(wait_for(|| events(&manager)[0].notified).await);
    assert!(events(&manager)[0].notified_at.is_some());

    manager.check_at(&cpu(70.0), t0 + ChronoDuration::seconds(150));
    let history = events(&manager);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert!(history[0].resolved_at.unwrap() >= history[0].fired_at);
    assert!(manager.rule_state("cpu_80").unwrap().is_idle());
}

#[tokio::test]
async fn test_no_firing_before_sustain() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_rule(&dir, Vec::new());

    let t0 = Utc::now();
    manager.check_at(&cpu(90.0), t0);
    manager.check_at(&cpu(90.0), t0 + ChronoDuration::seconds(30));
    manager.check_at(&cpu(70.0), t0 + ChronoDuration::seconds(60));

    assert!(events(&manager).is_empty());
    let state = manager.rule_state("cpu_80").unwrap();
    assert!(state.is_idle());
    assert_eq!(state.last_value, 70.0);
}

#[tokio::test]
async fn test_missing_metric_is_skipped() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_rule(&dir, Vec::new());

    let t0 = Utc::now();
    manager.check_at(&HashMap::new(), t0);
    assert!(manager.rule_state("cpu_80").unwrap().is_idle());
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<serde_json::Value>>>);

async fn capture(State(captured): State<Captured>, Json(body): Json<serde_json::Value>) -> &'static str {
    captured.0.lock().push(body);
    "ok"
}

async fn spawn_webhook() -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route("/hook", post(capture))
        .with_state(captured.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), captured)
}

fn webhook(url: &str) -> NotificationChannel {
    NotificationChannel {
        kind: "webhook".into(),
        enabled: true,
        config: BTreeMap::from([("url".to_string(), url.to_string())]),
    }
}

#[tokio::test]
async fn test_webhook_receives_firing_and_resolved() {
    let (url, captured) = spawn_webhook().await;
    let dir = TempDir::new().unwrap();
    let manager = manager_with_rule(&dir, vec![webhook(&url)]);

    let t0 = Utc::now();
    manager.check_at(&cpu(95.0), t0);
    manager.check_at(&cpu(95.0), t0 + ChronoDuration::seconds(120));
    assert!(wait_for(|| captured.0.lock().len() == 1).await);

    manager.check_at(&cpu(10.0), t0 + ChronoDuration::seconds(130));
    assert!(wait_for(|| captured.0.lock().len() == 2).await);

    let bodies = captured.0.lock().clone();
    assert_eq!(bodies[0]["alert"]["status"], "firing");
    assert_eq!(bodies[0]["alert"]["rule_id"], "cpu_80");
    assert_eq!(bodies[0]["alert"]["value"], 95.0);
    assert!(bodies[0]["text"].as_str().unwrap().contains("**Status:** FIRING"));
    assert_eq!(bodies[1]["alert"]["status"], "resolved");

    assert!(wait_for(|| events(&manager)[0].notified).await);
}

#[tokio::test]
async fn test_failed_webhook_leaves_event_unnotified() {
    let dir = TempDir::new().unwrap();
    // Nothing listens on port 9 of the loopback interface.
    let manager = manager_with_rule(&dir, vec![webhook("http://127.0.0.1:9/hook")]);

    let t0 = Utc::now();
    manager.check_at(&cpu(95.0), t0);
    manager.check_at(&cpu(95.0), t0 + ChronoDuration::seconds(120));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let history = events(&manager);
    assert_eq!(history.len(), 1);
    assert!(!history[0].notified);
    assert_eq!(manager.active_alerts().len(), 1);
}

#[tokio::test]
async fn test_history_persisted_after_dispatch() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_rule(&dir, Vec::new());

    let t0 = Utc::now();
    manager.check_at(&cpu(99.0), t0);
    manager.check_at(&cpu(99.0), t0 + ChronoDuration::seconds(121));

    let store = manager.store().clone();
    assert!(
        wait_for(|| {
            store
                .load_history()
                .ok()
                .flatten()
                .is_some_and(|h| h.len() == 1 && h[0].notified)
        })
        .await
    );
}
