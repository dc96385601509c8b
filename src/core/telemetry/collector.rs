//! Always-on sampling loops.
//!
//! Each loop owns one metric source and one latest-value cell. It primes the
//! cell as soon as it starts and then samples every
//! `max(base cadence, per-source minimum)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cell::LatestCell;
use super::source::MetricSource;

/// Upper bound on a single `collect` call.
pub const SAMPLE_TIMEOUT: Duration = Duration::from_secs(8);
/// Cadence floor accepted by `set_cadence`.
pub const MIN_CADENCE: Duration = Duration::from_secs(1);
/// Consecutive failures between two log lines for the same source.
const FAILURE_LOG_EVERY: u64 = 30;

pub struct IndependentCollector {
    name: &'static str,
    min_interval: Duration,
    cadence_ms: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IndependentCollector {
    /// Start sampling `source` into `cell`. Must be called inside a Tokio runtime.
    pub fn spawn<S: MetricSource>(
        source: S,
        cell: Arc<LatestCell<S::Reading>>,
        base_cadence: Duration,
        min_interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let name = source.name();
        let cadence_ms = Arc::new(AtomicU64::new(duration_ms(base_cadence.max(MIN_CADENCE))));
        let samples = Arc::new(AtomicU64::new(0));
        let cancel = parent.child_token();

        let handle = tokio::spawn(run_loop(
            Arc::new(Mutex::new(source)),
            cell,
            LoopTiming {
                cadence_ms: Arc::clone(&cadence_ms),
                min_interval,
            },
            Arc::clone(&samples),
            cancel.clone(),
        ));

        log::debug!("{} collector started (min interval {:?})", name, min_interval);

        Self {
            name,
            min_interval,
            cadence_ms,
            samples,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Change the base cadence; picked up on the next iteration.
    pub fn set_cadence(&self, cadence: Duration) {
        let cadence = cadence.max(MIN_CADENCE);
        self.cadence_ms.store(duration_ms(cadence), Ordering::Relaxed);
    }

    /// Base cadence last handed to this loop.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.load(Ordering::Relaxed))
    }

    /// Effective wait between two samples.
    pub fn effective_interval(&self) -> Duration {
        self.cadence().max(self.min_interval)
    }

    /// Number of readings stored so far.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel the loop and wait for it to exit. The cell keeps its last value.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("{} collector ended abnormally: {}", self.name, e);
            }
            log::info!("collector {}: shutting down", self.name);
        }
    }
}

pub(crate) struct LoopTiming {
    pub cadence_ms: Arc<AtomicU64>,
    pub min_interval: Duration,
}

impl LoopTiming {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            cadence_ms: Arc::new(AtomicU64::new(duration_ms(interval))),
            min_interval: Duration::ZERO,
        }
    }

    fn next_wait(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.load(Ordering::Relaxed)).max(self.min_interval)
    }
}

/// Prime the cell, then sample on every tick until cancelled.
pub(crate) async fn run_loop<S: MetricSource>(
    source: Arc<Mutex<S>>,
    cell: Arc<LatestCell<S::Reading>>,
    timing: LoopTiming,
    samples: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let name = source.lock().name();
    let mut failures = FailureLog::new(name);

    loop {
        match sample_once(&source, name, &cancel).await {
            Some(reading) => {
                cell.store(reading);
                samples.fetch_add(1, Ordering::Relaxed);
                failures.success();
            }
            None if cancel.is_cancelled() => break,
            None => failures.failure(),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(timing.next_wait()) => {}
        }
    }
}

/// Run one `collect` on the blocking pool under [`SAMPLE_TIMEOUT`].
async fn sample_once<S: MetricSource>(
    source: &Arc<Mutex<S>>,
    name: &'static str,
    cancel: &CancellationToken,
) -> Option<S::Reading> {
    let token = cancel.child_token();
    let worker_token = token.clone();
    let worker_source = Arc::clone(source);

    let mut handle = tokio::task::spawn_blocking(move || {
        let mut source = worker_source.lock();
        source.collect(&worker_token)
    });

    match tokio::time::timeout(SAMPLE_TIMEOUT, &mut handle).await {
        Ok(Ok(reading)) => reading,
        Ok(Err(e)) => {
            log::error!("{} collector: sample panicked: {}", name, e);
            None
        }
        Err(_) => {
            log::warn!("{} collector: sample exceeded {:?}, cancelling", name, SAMPLE_TIMEOUT);
            token.cancel();
            let _ = handle.await;
            None
        }
    }
}

/// Logs a failing source once every [`FAILURE_LOG_EVERY`] consecutive misses.
struct FailureLog {
    name: &'static str,
    consecutive: u64,
}

impl FailureLog {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            consecutive: 0,
        }
    }

    fn failure(&mut self) {
        if self.consecutive % FAILURE_LOG_EVERY == 0 {
            log::warn!(
                "{} collector: empty sample ({} consecutive)",
                self.name,
                self.consecutive + 1
            );
        }
        self.consecutive += 1;
    }

    fn success(&mut self) {
        if self.consecutive > 0 {
            log::debug!(
                "{} collector recovered after {} empty samples",
                self.name,
                self.consecutive
            );
        }
        self.consecutive = 0;
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
