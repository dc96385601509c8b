use std::net::SocketAddr;
use std::sync::Arc;

use opswatch::core::telemetry::SnapshotHub;
use opswatch::server::{self, AppState};
use opswatch::{AlertManager, Config};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct ApiServer {
    base: String,
    http: reqwest::Client,
    hub: Arc<SnapshotHub>,
    stop: CancellationToken,
    _dir: TempDir,
}

impl ApiServer {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let hub = SnapshotHub::builder().build();
        let config = Config {
            token: Some("api-token".into()),
            ..Config::default()
        };
        let state = AppState::new(Arc::clone(&hub), AlertManager::open(dir.path()), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let signal = stop.clone();
        tokio::spawn(server::serve(listener, state, async move {
            signal.cancelled().await;
        }));

        Self {
            base: format!("http://{}", addr),
            http: reqwest::Client::new(),
            hub,
            stop,
            _dir: dir,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base, path))
            .bearer_auth("api-token")
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base, path))
            .bearer_auth("api-token")
    }

    async fn shutdown(self) {
        self.stop.cancel();
        self.hub.shutdown().await;
    }
}

#[tokio::test]
async fn test_health_is_public_and_api_is_not() {
    let server = ApiServer::start().await;

    let health = server
        .http
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let anonymous = server
        .http
        .get(format!("{}/api/alerts/rules", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let rules: Vec<Value> = server
        .get("/api/alerts/rules")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules.len(), 8);

    server.shutdown().await;
}

#[tokio::test]
async fn test_rule_lifecycle_over_http() {
    let server = ApiServer::start().await;

    let created = server
        .post("/api/alerts/rules")
        .json(&json!({
            "id": "load_spike",
            "name": "Load spike",
            "metric": "cpu",
            "operator": ">",
            "threshold": 95.0,
            "duration": "30s",
            "severity": "critical"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let duplicate = server
        .post("/api/alerts/rules")
        .json(&json!({
            "id": "load_spike",
            "name": "Load spike",
            "metric": "cpu",
            "operator": ">",
            "threshold": 95.0,
            "duration": "30s"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);

    let enabled: Value = server
        .post("/api/alerts/rules/load_spike/enable")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(enabled["enabled"], true);

    let missing = server.get("/api/alerts/rules/nope").send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let error: Value = missing.json().await.unwrap();
    assert!(error["error"].is_string());

    let deleted = server
        .http
        .delete(format!("{}/api/alerts/rules/load_spike", server.base))
        .bearer_auth("api-token")
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    server.shutdown().await;
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let server = ApiServer::start().await;

    let bad_metric = server
        .post("/api/alerts/rules")
        .json(&json!({
            "id": "mystery",
            "name": "Mystery",
            "metric": "entropy",
            "operator": ">",
            "threshold": 1.0,
            "duration": "1m"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_metric.status(), StatusCode::BAD_REQUEST);

    let bad_since = server
        .get("/api/alerts/history?since=yesterday")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_since.status(), StatusCode::BAD_REQUEST);

    let history: Value = server
        .get("/api/alerts/history?limit=5")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["total"], 0);

    let summary = server.get("/api/alerts/summary").send().await.unwrap();
    assert_eq!(summary.status(), StatusCode::OK);

    server.shutdown().await;
}
