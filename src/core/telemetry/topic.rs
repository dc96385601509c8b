//! Reference-counted on-demand collectors.
//!
//! A topic collector samples only while at least one subscriber asked for
//! its topic. The last reading survives an idle period so a returning
//! subscriber sees data before the first new sample lands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cell::LatestCell;
use super::collector::{run_loop, LoopTiming};
use super::source::MetricSource;

pub const DEFAULT_TOPIC_CADENCE: Duration = Duration::from_secs(15);

type Starter = Box<dyn Fn(CancellationToken) -> JoinHandle<()> + Send + Sync>;

#[derive(Default)]
struct TopicState {
    subscribers: usize,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    shutdown: bool,
}

pub struct TopicCollector {
    name: &'static str,
    cadence: Duration,
    parent: CancellationToken,
    samples: Arc<AtomicU64>,
    starter: Starter,
    state: Mutex<TopicState>,
}

impl TopicCollector {
    pub fn new<S: MetricSource>(
        source: S,
        cell: Arc<LatestCell<S::Reading>>,
        cadence: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let name = source.name();
        let cadence = if cadence.is_zero() {
            DEFAULT_TOPIC_CADENCE
        } else {
            cadence
        };
        let source = Arc::new(Mutex::new(source));
        let samples = Arc::new(AtomicU64::new(0));
        let loop_samples = Arc::clone(&samples);

        let starter: Starter = Box::new(move |cancel: CancellationToken| {
            tokio::spawn(run_loop(
                Arc::clone(&source),
                Arc::clone(&cell),
                LoopTiming::fixed(cadence),
                Arc::clone(&loop_samples),
                cancel,
            ))
        });

        Self {
            name,
            cadence,
            parent: parent.clone(),
            samples,
            starter,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Add a subscriber; the first one starts the worker.
    pub fn subscribe(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.subscribers += 1;
        if state.cancel.is_some() {
            return;
        }

        let cancel = self.parent.child_token();
        state.handle = Some((self.starter)(cancel.clone()));
        state.cancel = Some(cancel);
        log::debug!("{} topic collector started", self.name);
    }

    /// Drop a subscriber; the last one stops the worker.
    pub fn unsubscribe(&self) {
        let mut state = self.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers > 0 {
            return;
        }
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
            log::debug!("{} topic collector idle", self.name);
        }
    }

    /// Permanently disable the collector and wait for its worker. Idempotent.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.subscribers = 0;
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            state.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("{} topic collector ended abnormally: {}", self.name, e);
            }
        }
    }

    pub fn subscribers(&self) -> usize {
        self.state.lock().subscribers
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().cancel.is_some()
    }

    /// Readings stored since creation.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}
