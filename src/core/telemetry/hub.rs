//! Snapshot hub: owns every collector, merges their latest readings and
//! tracks the cadence each subscriber wants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::cell::{LatestCell, Sample};
use super::collector::IndependentCollector;
use super::history::MetricsHistory;
use super::metrics::*;
use super::snapshot::{Snapshot, Topic};
use super::source::MetricSource;
use super::topic::{TopicCollector, DEFAULT_TOPIC_CADENCE};
use crate::utils::format::round2;

pub const DEFAULT_BASE_CADENCE: Duration = Duration::from_secs(5);
pub const MIN_CLIENT_CADENCE: Duration = Duration::from_secs(2);
pub const MAX_CLIENT_CADENCE: Duration = Duration::from_secs(60);
pub const READY_DELAY: Duration = Duration::from_millis(500);

pub const CPU_MIN_INTERVAL: Duration = Duration::ZERO;
pub const MEMORY_MIN_INTERVAL: Duration = Duration::ZERO;
pub const NETWORK_MIN_INTERVAL: Duration = Duration::ZERO;
pub const DISK_MIN_INTERVAL: Duration = Duration::from_secs(2);
pub const SENSORS_MIN_INTERVAL: Duration = Duration::from_secs(2);
pub const GPU_MIN_INTERVAL: Duration = Duration::from_secs(2);
pub const POWER_MIN_INTERVAL: Duration = Duration::from_secs(3);
pub const SSH_MIN_INTERVAL: Duration = Duration::from_secs(5);
pub const SYSTEM_MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Metric name to current value, as handed to the alert engine.
pub type MetricValues = HashMap<String, f64>;

/// Consumer of every merged snapshot's headline values.
pub trait AlertSink: Send + Sync {
    fn check(&self, metrics: &MetricValues);
}

/// Clamp a subscriber's desired cadence to the supported range.
pub fn clamp_cadence(desired: Duration) -> Duration {
    desired.clamp(MIN_CLIENT_CADENCE, MAX_CLIENT_CADENCE)
}

/// One latest-value cell per signal.
#[derive(Default)]
pub struct HubCells {
    pub cpu: Arc<LatestCell<CpuReading>>,
    pub memory: Arc<LatestCell<MemoryReading>>,
    pub network: Arc<LatestCell<NetworkReading>>,
    pub disk: Arc<LatestCell<DiskReading>>,
    pub sensors: Arc<LatestCell<SensorsReading>>,
    pub power: Arc<LatestCell<PowerReading>>,
    pub gpu: Arc<LatestCell<Vec<GpuDetail>>>,
    pub ssh: Arc<LatestCell<SshStats>>,
    pub system: Arc<LatestCell<SystemReading>>,
    pub processes: Arc<LatestCell<Vec<ProcessInfo>>>,
    pub net_detail: Arc<LatestCell<NetDetailReading>>,
}

type Launch = Box<dyn FnOnce(Duration, &CancellationToken) -> IndependentCollector + Send>;
type TopicLaunch = Box<dyn FnOnce(Duration, &CancellationToken) -> TopicCollector + Send>;

/// Registers metric sources before the hub starts its workers.
pub struct HubBuilder {
    cells: HubCells,
    independent: Vec<Launch>,
    processes: Option<TopicLaunch>,
    net_detail: Option<TopicLaunch>,
    topic_cadence: Duration,
    ready_delay: Duration,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl HubBuilder {
    pub fn new() -> Self {
        Self {
            cells: HubCells::default(),
            independent: Vec::new(),
            processes: None,
            net_detail: None,
            topic_cadence: DEFAULT_TOPIC_CADENCE,
            ready_delay: READY_DELAY,
            alerts: None,
        }
    }

    fn independent<S: MetricSource>(
        mut self,
        source: S,
        cell: Arc<LatestCell<S::Reading>>,
        min_interval: Duration,
    ) -> Self {
        self.independent.push(Box::new(move |base, root| {
            IndependentCollector::spawn(source, cell, base, min_interval, root)
        }));
        self
    }

    fn topic_launch<S: MetricSource>(source: S, cell: Arc<LatestCell<S::Reading>>) -> TopicLaunch {
        Box::new(move |cadence, root| TopicCollector::new(source, cell, cadence, root))
    }

    pub fn cpu<S: MetricSource<Reading = CpuReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.cpu);
        self.independent(source, cell, CPU_MIN_INTERVAL)
    }

    pub fn memory<S: MetricSource<Reading = MemoryReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.memory);
        self.independent(source, cell, MEMORY_MIN_INTERVAL)
    }

    pub fn network<S: MetricSource<Reading = NetworkReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.network);
        self.independent(source, cell, NETWORK_MIN_INTERVAL)
    }

    pub fn disk<S: MetricSource<Reading = DiskReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.disk);
        self.independent(source, cell, DISK_MIN_INTERVAL)
    }

    pub fn sensors<S: MetricSource<Reading = SensorsReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.sensors);
        self.independent(source, cell, SENSORS_MIN_INTERVAL)
    }

    pub fn power<S: MetricSource<Reading = PowerReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.power);
        self.independent(source, cell, POWER_MIN_INTERVAL)
    }

    pub fn gpu<S: MetricSource<Reading = Vec<GpuDetail>>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.gpu);
        self.independent(source, cell, GPU_MIN_INTERVAL)
    }

    pub fn ssh<S: MetricSource<Reading = SshStats>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.ssh);
        self.independent(source, cell, SSH_MIN_INTERVAL)
    }

    pub fn system<S: MetricSource<Reading = SystemReading>>(self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.system);
        self.independent(source, cell, SYSTEM_MIN_INTERVAL)
    }

    pub fn processes<S: MetricSource<Reading = Vec<ProcessInfo>>>(mut self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.processes);
        self.processes = Some(Self::topic_launch(source, cell));
        self
    }

    pub fn net_detail<S: MetricSource<Reading = NetDetailReading>>(mut self, source: S) -> Self {
        let cell = Arc::clone(&self.cells.net_detail);
        self.net_detail = Some(Self::topic_launch(source, cell));
        self
    }

    /// Sampling period of the on-demand collectors.
    pub fn topic_cadence(mut self, cadence: Duration) -> Self {
        self.topic_cadence = cadence;
        self
    }

    pub fn ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn alerts(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Start every registered collector. Must be called inside a Tokio runtime.
    pub fn build(self) -> Arc<SnapshotHub> {
        let root = CancellationToken::new();

        let collectors: Vec<IndependentCollector> = self
            .independent
            .into_iter()
            .map(|launch| launch(DEFAULT_BASE_CADENCE, &root))
            .collect();
        let topic_cadence = self.topic_cadence;
        let processes = self.processes.map(|launch| launch(topic_cadence, &root));
        let net_detail = self.net_detail.map(|launch| launch(topic_cadence, &root));

        let (ready_tx, _) = watch::channel(false);
        let ready = Arc::new(ready_tx);

        let gate = Arc::clone(&ready);
        let gate_cancel = root.clone();
        let delay = self.ready_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = gate_cancel.cancelled() => {}
            }
            gate.send_replace(true);
        });

        log::info!(
            "Snapshot hub started with {} collectors (processes: {}, net_detail: {})",
            collectors.len(),
            processes.is_some(),
            net_detail.is_some()
        );

        Arc::new(SnapshotHub {
            cells: self.cells,
            collectors,
            processes,
            net_detail,
            alerts: self.alerts,
            clients: Mutex::new(HashMap::new()),
            base_cadence_ms: AtomicU64::new(duration_ms(DEFAULT_BASE_CADENCE)),
            next_id: AtomicU64::new(1),
            history: Mutex::new(HistoryState::default()),
            ready,
            shutdown: AtomicBool::new(false),
            root,
        })
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct HistoryState {
    rings: MetricsHistory,
    cpu_seq: u64,
    memory_seq: u64,
}

pub struct SnapshotHub {
    cells: HubCells,
    collectors: Vec<IndependentCollector>,
    processes: Option<TopicCollector>,
    net_detail: Option<TopicCollector>,
    alerts: Option<Arc<dyn AlertSink>>,
    clients: Mutex<HashMap<u64, Duration>>,
    base_cadence_ms: AtomicU64,
    next_id: AtomicU64,
    history: Mutex<HistoryState>,
    ready: Arc<watch::Sender<bool>>,
    shutdown: AtomicBool,
    root: CancellationToken,
}

impl SnapshotHub {
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// Fresh subscriber id, strictly increasing.
    pub fn next_subscriber_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a subscriber's cadence and propagate the new minimum.
    pub fn register(&self, id: u64, desired: Duration) {
        let desired = clamp_cadence(desired);
        let base = {
            let mut clients = self.clients.lock();
            clients.insert(id, desired);
            min_cadence(&clients)
        };
        log::debug!("subscriber {} registered at {:?}, base cadence {:?}", id, desired, base);
        self.apply_base_cadence(base);
    }

    pub fn unregister(&self, id: u64) {
        let base = {
            let mut clients = self.clients.lock();
            clients.remove(&id);
            min_cadence(&clients)
        };
        log::debug!("subscriber {} unregistered, base cadence {:?}", id, base);
        self.apply_base_cadence(base);
    }

    fn apply_base_cadence(&self, base: Duration) {
        self.base_cadence_ms.store(duration_ms(base), Ordering::Relaxed);
        for collector in &self.collectors {
            collector.set_cadence(base);
        }
    }

    pub fn base_cadence(&self) -> Duration {
        Duration::from_millis(self.base_cadence_ms.load(Ordering::Relaxed))
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn subscribe(&self, topic: Topic) {
        if let Some(collector) = self.topic(topic) {
            collector.subscribe();
        }
    }

    pub fn unsubscribe(&self, topic: Topic) {
        if let Some(collector) = self.topic(topic) {
            collector.unsubscribe();
        }
    }

    /// Topic collector backing `topic`, if one was registered.
    pub fn topic(&self, topic: Topic) -> Option<&TopicCollector> {
        match topic {
            Topic::Base => None,
            Topic::Processes => self.processes.as_ref(),
            Topic::NetDetail => self.net_detail.as_ref(),
        }
    }

    pub fn collector(&self, name: &str) -> Option<&IndependentCollector> {
        self.collectors.iter().find(|c| c.name() == name)
    }

    pub fn cells(&self) -> &HubCells {
        &self.cells
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the ready gate. Returns false on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// Merge every cell into one snapshot, update the derived histories and
    /// feed the alert engine. Never blocks on I/O.
    pub fn latest_snapshot(&self) -> Snapshot {
        let cpu = self.cells.cpu.load();
        let memory = self.cells.memory.load();
        let sensors = self.cells.sensors.load();
        let mut snap = self.merge_cells(cpu.as_deref(), memory.as_deref(), sensors.as_deref());

        {
            let mut history = self.history.lock();
            if let Some(sample) = &cpu {
                if sample.seq != history.cpu_seq {
                    history.cpu_seq = sample.seq;
                    let temp = sensors
                        .as_ref()
                        .map(|s| round2(s.reading.average_temperature()))
                        .unwrap_or(0.0);
                    history.rings.push_temp(temp);
                    history.rings.push_cpu(sample.reading.percent);
                }
            }
            if let Some(sample) = &memory {
                if sample.seq != history.memory_seq {
                    history.memory_seq = sample.seq;
                    history.rings.push_memory(sample.reading.memory.percent);
                }
            }
            snap.cpu.temp_history = history.rings.temp_vec();
            snap.cpu.percent_history = history.rings.cpu_vec();
            snap.memory.history = history.rings.memory_vec();
        }

        if let Some(alerts) = &self.alerts {
            alerts.check(&alert_metrics(&snap));
        }

        snap
    }

    /// Current alert inputs, read straight from the cells. Leaves the
    /// histories and the alert engine untouched.
    pub fn current_metrics(&self) -> MetricValues {
        let cpu = self.cells.cpu.load();
        let memory = self.cells.memory.load();
        alert_metrics(&self.merge_cells(cpu.as_deref(), memory.as_deref(), None))
    }

    fn merge_cells(
        &self,
        cpu: Option<&Sample<CpuReading>>,
        memory: Option<&Sample<MemoryReading>>,
        sensors: Option<&Sample<SensorsReading>>,
    ) -> Snapshot {
        let mut snap = Snapshot::default();

        if let Some(sample) = cpu {
            snap.cpu = sample.reading.clone();
        }
        if let Some(sample) = memory {
            snap.memory = sample.reading.memory.clone();
            snap.swap = sample.reading.swap.clone();
        }

        if let Some(sample) = self.cells.disk.load() {
            snap.disk = sample.reading.disks.clone();
            snap.inodes = sample.reading.inodes.clone();
            snap.disk_io = sample.reading.io.clone();
        }

        if let Some(sample) = self.cells.network.load() {
            snap.network.apply_basic(&sample.reading);
        }
        if let Some(sample) = self.cells.net_detail.load() {
            snap.network.apply_detail(&sample.reading);
        }

        if let Some(sample) = sensors {
            snap.sensors = sample.reading.sensors.clone();
            snap.fans = sample.reading.fans.clone();
        }

        if let Some(sample) = self.cells.power.load() {
            snap.power = sample.reading.clone();
        }
        if let Some(sample) = self.cells.gpu.load() {
            snap.gpu = sample.reading.clone();
        }
        if let Some(sample) = self.cells.ssh.load() {
            snap.ssh_stats = sample.reading.clone();
        }
        if let Some(sample) = self.cells.system.load() {
            snap.boot_time = sample.reading.boot_time.clone();
        }
        if let Some(sample) = self.cells.processes.load() {
            snap.processes = sample.reading.clone();
        }
        snap
    }

    /// Stop every collector and open the ready gate for good. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Snapshot hub: shutting down all collectors");
        self.ready.send_replace(true);

        for collector in &self.collectors {
            collector.stop().await;
        }
        if let Some(topic) = &self.processes {
            topic.stop().await;
        }
        if let Some(topic) = &self.net_detail {
            topic.stop().await;
        }
        self.root.cancel();
        log::info!("Snapshot hub: all collectors stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Values the alert rules can refer to.
pub fn alert_metrics(snap: &Snapshot) -> MetricValues {
    let max_disk = snap.disk.iter().map(|d| d.percent).fold(0.0, f64::max);
    HashMap::from([
        ("cpu".to_string(), snap.cpu.percent),
        ("memory".to_string(), snap.memory.percent),
        ("disk".to_string(), max_disk),
        ("swap".to_string(), snap.swap.percent),
        ("load1".to_string(), snap.cpu.load(0)),
        ("load5".to_string(), snap.cpu.load(1)),
        ("load15".to_string(), snap.cpu.load(2)),
    ])
}

fn min_cadence(clients: &HashMap<u64, Duration>) -> Duration {
    clients
        .values()
        .copied()
        .min()
        .unwrap_or(DEFAULT_BASE_CADENCE)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_cadence() {
        assert_eq!(clamp_cadence(Duration::from_millis(500)), MIN_CLIENT_CADENCE);
        assert_eq!(clamp_cadence(Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(clamp_cadence(Duration::from_secs(600)), MAX_CLIENT_CADENCE);
    }

    #[test]
    fn test_min_cadence_defaults_when_empty() {
        let mut clients = HashMap::new();
        assert_eq!(min_cadence(&clients), DEFAULT_BASE_CADENCE);
        clients.insert(1, Duration::from_secs(10));
        clients.insert(2, Duration::from_secs(4));
        assert_eq!(min_cadence(&clients), Duration::from_secs(4));
    }

    #[test]
    fn test_alert_metrics_keys() {
        let mut snap = Snapshot::default();
        snap.cpu.percent = 45.2;
        snap.cpu.load_avg = vec![0.5, 0.75, 1.0];
        let metrics = alert_metrics(&snap);
        assert_eq!(metrics.len(), 7);
        assert_eq!(metrics["cpu"], 45.2);
        assert_eq!(metrics["memory"], 0.0);
        assert_eq!(metrics["load15"], 1.0);
    }

    #[tokio::test]
    async fn test_empty_hub_is_ready_after_delay() {
        let hub = SnapshotHub::builder()
            .ready_delay(Duration::from_millis(20))
            .build();
        assert!(!hub.is_ready());
        assert!(hub.wait_ready(Duration::from_secs(2)).await);
        hub.shutdown().await;
        hub.shutdown().await;
        assert!(hub.is_shut_down());
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let hub = SnapshotHub::builder()
            .ready_delay(Duration::from_secs(30))
            .build();
        assert!(!hub.wait_ready(Duration::from_millis(20)).await);
        hub.shutdown().await;
        assert!(hub.wait_ready(Duration::from_millis(20)).await);
    }
}
