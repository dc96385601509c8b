use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use opswatch::core::telemetry::metrics::{CpuReading, ProcessInfo};
use opswatch::core::telemetry::{FnSource, SnapshotHub, Topic};
use opswatch::server::{self, AppState};
use opswatch::{AlertManager, Config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN: &str = "secret";

struct TestServer {
    addr: SocketAddr,
    hub: Arc<SnapshotHub>,
    stop: CancellationToken,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let hub = SnapshotHub::builder()
            .cpu(FnSource::new("cpu", |_: &CancellationToken| {
                Some(CpuReading {
                    percent: 12.5,
                    ..Default::default()
                })
            }))
            .processes(FnSource::new("processes", |_: &CancellationToken| {
                Some(vec![ProcessInfo {
                    pid: 42,
                    name: "worker".into(),
                    ..Default::default()
                }])
            }))
            .topic_cadence(Duration::from_millis(50))
            .ready_delay(Duration::ZERO)
            .build();

        let config = Config {
            token: Some(TOKEN.to_string()),
            ..Config::default()
        };
        let state = AppState::new(Arc::clone(&hub), AlertManager::open(dir.path()), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let signal = stop.clone();
        tokio::spawn(server::serve(listener, state, async move {
            signal.cancelled().await;
        }));

        Self {
            addr,
            hub,
            stop,
            _dir: dir,
        }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}/ws{}", self.addr, query)
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.url("?token=secret&interval=2")).await.unwrap();
        client
    }

    async fn shutdown(self) {
        self.stop.cancel();
        self.hub.shutdown().await;
    }
}

async fn next_snapshot(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("no frame within 10s")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn expect_http_status(result: Result<(Client, impl Sized), WsError>, status: u16) {
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), status),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_missing_or_wrong_token_is_rejected() {
    let server = TestServer::start().await;

    expect_http_status(connect_async(server.url("")).await, 401);
    expect_http_status(connect_async(server.url("?token=guess")).await, 401);
    assert_eq!(server.hub.client_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_foreign_origin_is_rejected() {
    let server = TestServer::start().await;

    let mut request = server.url("?token=secret").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    expect_http_status(connect_async(request).await, 403);

    server.shutdown().await;
}

#[tokio::test]
async fn test_streams_base_snapshot() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let mut frame = next_snapshot(&mut client).await;
    while frame["cpu"]["percent"] != 12.5 {
        frame = next_snapshot(&mut client).await;
    }
    for key in [
        "cpu", "fans", "sensors", "power", "memory", "swap", "disk", "disk_io", "inodes",
        "network", "ssh_stats", "boot_time", "processes", "gpu",
    ] {
        assert!(frame.get(key).is_some(), "missing {}", key);
    }
    assert!(frame["processes"].as_array().unwrap().is_empty());
    assert_eq!(server.hub.client_count(), 1);
    assert_eq!(server.hub.base_cadence(), Duration::from_secs(2));

    client.close(None).await.unwrap();
    assert!(wait_until(|| server.hub.client_count() == 0).await);
    assert_eq!(server.hub.base_cadence(), Duration::from_secs(5));

    server.shutdown().await;
}

#[tokio::test]
async fn test_cookie_and_subprotocol_credentials() {
    let server = TestServer::start().await;

    let mut request = server.url("").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Cookie", "auth_token=secret".parse().unwrap());
    let (mut cookie_client, _) = connect_async(request).await.unwrap();
    next_snapshot(&mut cookie_client).await;

    let mut request = server.url("").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", TOKEN.parse().unwrap());
    let (mut proto_client, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        TOKEN
    );
    next_snapshot(&mut proto_client).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_set_topics_gates_processes() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    next_snapshot(&mut client).await;

    let control = r#"{"type":"set_topics","topics":["processes","no_such_topic"]}"#;
    client.send(Message::Text(control.into())).await.unwrap();

    let mut frame = next_snapshot(&mut client).await;
    while frame["processes"].as_array().unwrap().is_empty() {
        frame = next_snapshot(&mut client).await;
    }
    assert_eq!(frame["processes"][0]["name"], "worker");
    let topic = server.hub.topic(Topic::Processes).unwrap();
    assert_eq!(topic.subscribers(), 1);

    client
        .send(Message::Text(r#"{"type":"set_topics","topics":[]}"#.into()))
        .await
        .unwrap();
    assert!(wait_until(|| !topic.is_running()).await);

    client
        .send(Message::Text(r#"{"type":"set_topics","topics":["processes"]}"#.into()))
        .await
        .unwrap();
    assert!(wait_until(|| topic.subscribers() == 1).await);

    drop(client);
    assert!(wait_until(|| topic.subscribers() == 0 && server.hub.client_count() == 0).await);

    server.shutdown().await;
}

async fn wait_closed(client: &mut Client) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

#[tokio::test]
async fn test_message_flood_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    for _ in 0..10 {
        if client.send(Message::Text("not json".into())).await.is_err() {
            break;
        }
    }
    assert!(wait_closed(&mut client).await);
    assert!(wait_until(|| server.hub.client_count() == 0).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    next_snapshot(&mut client).await;

    server.stop.cancel();
    assert!(wait_closed(&mut client).await);
    assert!(wait_until(|| server.hub.client_count() == 0).await);

    server.hub.shutdown().await;
}
