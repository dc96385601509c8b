use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opswatch::core::telemetry::metrics::ProcessInfo;
use opswatch::core::telemetry::{FnSource, SnapshotHub, Topic, TopicSet};
use tokio_util::sync::CancellationToken;

const CADENCE: Duration = Duration::from_millis(50);

fn process_hub(calls: Arc<AtomicU64>) -> Arc<SnapshotHub> {
    SnapshotHub::builder()
        .processes(FnSource::new("processes", move |_: &CancellationToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(vec![ProcessInfo {
                pid: 1,
                name: "init".into(),
                ..Default::default()
            }])
        }))
        .topic_cadence(CADENCE)
        .ready_delay(Duration::ZERO)
        .build()
}

#[tokio::test]
async fn test_topic_collector_only_runs_while_subscribed() {
    let calls = Arc::new(AtomicU64::new(0));
    let hub = process_hub(Arc::clone(&calls));
    let topic = hub.topic(Topic::Processes).unwrap();

    tokio::time::sleep(CADENCE * 6).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(topic.samples(), 0);
    assert!(hub.latest_snapshot().processes.is_empty());

    hub.subscribe(Topic::Processes);
    assert!(topic.is_running());
    tokio::time::sleep(CADENCE * 3).await;
    let snap = hub.latest_snapshot();
    assert_eq!(snap.processes.len(), 1);
    assert_eq!(snap.processes[0].name, "init");

    hub.unsubscribe(Topic::Processes);
    assert!(!topic.is_running());
    tokio::time::sleep(CADENCE * 2).await;
    let after_stop = calls.load(Ordering::SeqCst);
    tokio::time::sleep(CADENCE * 6).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);

    // The last reading outlives the idle period.
    assert_eq!(hub.latest_snapshot().processes.len(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_reference_counting_across_subscribers() {
    let hub = process_hub(Arc::new(AtomicU64::new(0)));
    let topic = hub.topic(Topic::Processes).unwrap();

    hub.subscribe(Topic::Processes);
    hub.subscribe(Topic::Processes);
    assert_eq!(topic.subscribers(), 2);

    hub.unsubscribe(Topic::Processes);
    assert!(topic.is_running());
    hub.unsubscribe(Topic::Processes);
    assert!(!topic.is_running());

    // Extra unsubscribes never underflow.
    hub.unsubscribe(Topic::Processes);
    assert_eq!(topic.subscribers(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_stopped_topic_ignores_subscribe() {
    let hub = process_hub(Arc::new(AtomicU64::new(0)));
    hub.shutdown().await;

    hub.subscribe(Topic::Processes);
    let topic = hub.topic(Topic::Processes).unwrap();
    assert!(!topic.is_running());
    assert_eq!(topic.subscribers(), 0);
}

#[tokio::test]
async fn test_unsubscribed_topics_are_zeroed() {
    let hub = process_hub(Arc::new(AtomicU64::new(0)));
    hub.subscribe(Topic::Processes);
    tokio::time::sleep(CADENCE * 3).await;

    let full = hub.latest_snapshot();
    assert_eq!(full.clone().filtered(&TopicSet::from_names(["processes"])).processes.len(), 1);
    assert!(full.filtered(&TopicSet::base()).processes.is_empty());

    hub.shutdown().await;
}
