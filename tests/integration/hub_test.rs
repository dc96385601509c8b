use std::sync::Arc;
use std::time::Duration;

use opswatch::core::telemetry::metrics::{CpuReading, DiskInfo, DiskReading, MemoryReading};
use opswatch::core::telemetry::{AlertSink, FnSource, MetricValues, SnapshotHub, TopicSet};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<MetricValues>>);

impl AlertSink for RecordingSink {
    fn check(&self, metrics: &MetricValues) {
        self.0.lock().push(metrics.clone());
    }
}

fn idle_cpu_source() -> FnSource<impl FnMut(&CancellationToken) -> Option<CpuReading> + Send + 'static> {
    FnSource::new("cpu", |_: &CancellationToken| Some(CpuReading::default()))
}

fn idle_memory_source(
) -> FnSource<impl FnMut(&CancellationToken) -> Option<MemoryReading> + Send + 'static> {
    FnSource::new("memory", |_: &CancellationToken| Some(MemoryReading::default()))
}

#[tokio::test]
async fn test_cadence_propagates_to_collectors() {
    let hub = SnapshotHub::builder()
        .cpu(idle_cpu_source())
        .memory(idle_memory_source())
        .build();
    let cpu = hub.collector("cpu").unwrap();
    assert_eq!(hub.base_cadence(), Duration::from_secs(5));

    let slow = hub.next_subscriber_id();
    let fast = hub.next_subscriber_id();
    assert!(fast > slow);

    hub.register(slow, Duration::from_secs(5));
    assert_eq!(cpu.cadence(), Duration::from_secs(5));

    hub.register(fast, Duration::from_secs(3));
    assert_eq!(cpu.cadence(), Duration::from_secs(3));
    assert_eq!(hub.collector("memory").unwrap().cadence(), Duration::from_secs(3));

    hub.unregister(fast);
    assert_eq!(cpu.cadence(), Duration::from_secs(5));

    hub.unregister(slow);
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.base_cadence(), Duration::from_secs(5));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_cadence_is_clamped() {
    let hub = SnapshotHub::builder().cpu(idle_cpu_source()).build();

    hub.register(1, Duration::from_millis(100));
    assert_eq!(hub.base_cadence(), Duration::from_secs(2));

    hub.register(1, Duration::from_secs(3600));
    assert_eq!(hub.base_cadence(), Duration::from_secs(60));
    assert_eq!(hub.collector("cpu").unwrap().cadence(), Duration::from_secs(60));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_merges_cells_and_feeds_alerts() {
    let sink = Arc::new(RecordingSink::default());
    let hub = SnapshotHub::builder()
        .alerts(Arc::clone(&sink) as Arc<dyn AlertSink>)
        .build();

    hub.cells().cpu.store(CpuReading {
        percent: 45.2,
        ..Default::default()
    });
    let partitions = [12.5, 91.25, 40.0]
        .iter()
        .enumerate()
        .map(|(i, percent)| DiskInfo {
            device: format!("/dev/sda{}", i + 1),
            mountpoint: format!("/mnt/{}", i),
            percent: *percent,
            ..Default::default()
        })
        .collect();
    hub.cells().disk.store(DiskReading {
        disks: partitions,
        ..Default::default()
    });

    let snap = hub.latest_snapshot();
    assert_eq!(snap.cpu.percent, 45.2);
    assert_eq!(snap.memory.percent, 0.0);
    assert!(snap.memory.total.is_empty());
    assert_eq!(snap.disk.len(), 3);

    let calls = sink.0.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["cpu"], 45.2);
    assert_eq!(calls[0]["memory"], 0.0);
    assert_eq!(calls[0]["disk"], 91.25);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_current_metrics_is_read_only() {
    let sink = Arc::new(RecordingSink::default());
    let hub = SnapshotHub::builder()
        .alerts(Arc::clone(&sink) as Arc<dyn AlertSink>)
        .build();

    hub.cells().cpu.store(CpuReading {
        percent: 61.5,
        ..Default::default()
    });
    let metrics = hub.current_metrics();
    assert_eq!(metrics["cpu"], 61.5);
    assert_eq!(metrics.len(), 7);
    assert!(sink.0.lock().is_empty());

    // The history rings were not advanced by the read above.
    let snap = hub.latest_snapshot();
    assert_eq!(snap.cpu.percent_history, vec![61.5]);
    assert_eq!(sink.0.lock().len(), 1);

    hub.shutdown().await;
}

fn assert_no_nulls(path: &str, value: &Value) {
    match value {
        Value::Null => panic!("null at {}", path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                assert_no_nulls(&format!("{}[{}]", path, i), item);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                assert_no_nulls(&format!("{}.{}", path, key), item);
            }
        }
        _ => {}
    }
}

#[tokio::test]
async fn test_snapshot_skeleton_before_first_sample() {
    let hub = SnapshotHub::builder().build();
    let snap = hub.latest_snapshot();
    let json = serde_json::to_value(&snap).unwrap();

    assert_no_nulls("snapshot", &json);
    for key in [
        "cpu", "fans", "sensors", "power", "memory", "swap", "disk", "disk_io", "inodes",
        "network", "ssh_stats", "boot_time", "processes", "gpu",
    ] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    assert!(json["disk"].as_array().unwrap().is_empty());
    assert!(json["sensors"].as_object().unwrap().is_empty());
    assert!(json["network"]["interfaces"].as_object().unwrap().is_empty());

    let filtered = snap.filtered(&TopicSet::base());
    assert!(filtered.processes.is_empty());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_history_rings_follow_new_samples() {
    let hub = SnapshotHub::builder().build();

    hub.cells().cpu.store(CpuReading {
        percent: 10.0,
        ..Default::default()
    });
    let first = hub.latest_snapshot();
    assert_eq!(first.cpu.temp_history.len(), 1);
    assert_eq!(first.cpu.percent_history, vec![10.0]);

    // Same cell sequence: no new entries.
    let again = hub.latest_snapshot();
    assert_eq!(again.cpu.percent_history.len(), 1);

    hub.cells().cpu.store(CpuReading {
        percent: 20.0,
        ..Default::default()
    });
    let next = hub.latest_snapshot();
    assert_eq!(next.cpu.percent_history, vec![10.0, 20.0]);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_ready_gate_opens_on_primed_cells() {
    let hub = SnapshotHub::builder()
        .cpu(FnSource::new("cpu", |_: &CancellationToken| {
            Some(CpuReading {
                percent: 33.0,
                ..Default::default()
            })
        }))
        .ready_delay(Duration::from_millis(200))
        .build();

    assert!(hub.wait_ready(Duration::from_secs(2)).await);
    assert!(hub.cells().cpu.is_initialized());
    assert_eq!(hub.latest_snapshot().cpu.percent, 33.0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_collectors() {
    let hub = SnapshotHub::builder()
        .cpu(idle_cpu_source())
        .ready_delay(Duration::from_secs(30))
        .build();

    assert!(!hub.is_ready());
    hub.shutdown().await;
    assert!(hub.is_ready());
    assert!(!hub.collector("cpu").unwrap().is_running());
    assert!(hub.wait_ready(Duration::from_millis(10)).await);
}
