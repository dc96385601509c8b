//! Push channel: one session per websocket subscriber.
//!
//! Each session runs three workers. The pump ticks at the subscriber's
//! cadence and enqueues filtered snapshots, the writer drains the queue to the
//! socket and sends keep-alive pings, and the reader applies `set_topics`
//! control frames. Any worker ending cancels the other two.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::auth::{matching_subprotocol, origin_allowed};
use super::ratelimit::TokenBucket;
use super::AppState;
use crate::core::telemetry::hub::{clamp_cadence, MIN_CLIENT_CADENCE};
use crate::core::telemetry::{SnapshotHub, TopicSet};

pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PONG_WAIT: Duration = Duration::from_secs(60);
pub const PING_PERIOD: Duration = Duration::from_secs(54);
pub const READY_WAIT: Duration = Duration::from_secs(5);
/// Frames queued per subscriber before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 16;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub interval: Option<String>,
}

/// Inbound control frame. Unknown types are ignored.
#[derive(Debug, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Cadence from the `interval` query parameter (seconds, fractional allowed).
/// Missing or unparsable values mean the fastest cadence.
pub fn cadence_from_param(raw: Option<&str>) -> Duration {
    let secs = raw
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0);
    match secs {
        Some(secs) => clamp_cadence(Duration::from_secs_f64(secs.min(3600.0))),
        None => MIN_CLIENT_CADENCE,
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&headers, &state.allowed_origins) {
        log::warn!("Rejected websocket from disallowed origin {:?}", headers.get("origin"));
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let cadence = cadence_from_param(params.interval.as_deref());
    let upgrade = match state.token.as_ref().and_then(|d| matching_subprotocol(&headers, d)) {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let hub = Arc::clone(&state.hub);
    let shutdown = state.shutdown.clone();
    upgrade.on_upgrade(move |socket| run_session(socket, hub, cadence, shutdown))
}

/// Drive one subscriber until its socket fails or `shutdown` fires.
pub async fn run_session(
    socket: WebSocket,
    hub: Arc<SnapshotHub>,
    cadence: Duration,
    shutdown: CancellationToken,
) {
    let id = hub.next_subscriber_id();
    hub.register(id, cadence);
    log::info!("Subscriber {} connected at {:?}", id, cadence);

    let done = shutdown.child_token();
    let topics = Arc::new(Mutex::new(TopicSet::base()));
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(write_loop(sink, rx, done.clone()));
    let pump = tokio::spawn(pump_loop(
        Arc::clone(&hub),
        Arc::clone(&topics),
        tx,
        cadence,
        done.clone(),
    ));
    read_loop(stream, &hub, &topics, &done).await;

    done.cancel();
    let _ = pump.await;
    let _ = writer.await;

    let subscribed: Vec<_> = topics.lock().on_demand().collect();
    for topic in subscribed {
        hub.unsubscribe(topic);
    }
    hub.unregister(id);
    log::info!("Subscriber {} disconnected", id);
}

/// Produce one frame per tick. A full queue drops the frame and keeps the
/// session alive; returns the number of dropped frames.
async fn pump_loop(
    hub: Arc<SnapshotHub>,
    topics: Arc<Mutex<TopicSet>>,
    tx: mpsc::Sender<String>,
    cadence: Duration,
    done: CancellationToken,
) -> u64 {
    tokio::select! {
        ready = hub.wait_ready(READY_WAIT) => {
            if !ready {
                log::debug!("Hub not ready after {:?}, streaming anyway", READY_WAIT);
            }
        }
        _ = done.cancelled() => return 0,
    }

    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dropped: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = done.cancelled() => break,
        }

        let filter = topics.lock().clone();
        let snapshot = hub.latest_snapshot().filtered(&filter);
        let frame = match serde_json::to_string(&snapshot) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Failed to encode snapshot: {}", e);
                continue;
            }
        };

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped == 1 || dropped % 30 == 0 {
                    log::debug!("Slow subscriber, {} frames dropped so far", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    dropped
}

async fn send_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), String> {
    match timeout(WRITE_TIMEOUT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write timed out after {:?}", WRITE_TIMEOUT)),
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    done: CancellationToken,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let result = tokio::select! {
            _ = done.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => send_with_deadline(&mut sink, Message::Text(frame.into())).await,
                None => break,
            },
            _ = ping.tick() => send_with_deadline(&mut sink, Message::Ping(Bytes::new())).await,
        };
        if let Err(e) = result {
            log::debug!("Subscriber write failed: {}", e);
            break;
        }
    }

    done.cancel();
    let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &SnapshotHub,
    topics: &Mutex<TopicSet>,
    done: &CancellationToken,
) {
    let mut limiter = TokenBucket::for_control_frames();

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => return,
            next = timeout(PONG_WAIT, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                log::debug!("Subscriber idle for {:?}, closing", PONG_WAIT);
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                log::debug!("Subscriber read failed: {}", e);
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        let payload = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if !limiter.allow() {
            log::warn!("Subscriber exceeded the control message rate, closing");
            return;
        }

        match serde_json::from_str::<ControlMessage>(&payload) {
            Ok(control) if control.kind == "set_topics" => {
                apply_topics(hub, topics, &control.topics);
            }
            Ok(_) => {}
            Err(_) => log::debug!("Ignoring malformed control frame"),
        }
    }
}

/// Replace the subscriber's topic set and forward the delta to the hub.
pub fn apply_topics(hub: &SnapshotHub, topics: &Mutex<TopicSet>, names: &[String]) {
    let next = TopicSet::from_names(names);
    let previous = std::mem::replace(&mut *topics.lock(), next.clone());

    for topic in next.difference(&previous) {
        hub.subscribe(topic);
    }
    for topic in previous.difference(&next) {
        hub.unsubscribe(topic);
    }
}
