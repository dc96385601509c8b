use std::sync::Arc;
use std::time::Duration;

use opswatch::core::telemetry::collector::MIN_CADENCE;
use opswatch::core::telemetry::{FnSource, IndependentCollector, LatestCell};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_empty_samples_keep_previous_reading() {
    let root = CancellationToken::new();
    let cell = Arc::new(LatestCell::new());
    let mut n = 0u32;
    let collector = IndependentCollector::spawn(
        FnSource::new("flaky", move |_: &CancellationToken| {
            n += 1;
            (n == 1).then_some(n)
        }),
        Arc::clone(&cell),
        MIN_CADENCE,
        Duration::ZERO,
        &root,
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(cell.load().unwrap().reading, 1);
    assert_eq!(cell.seq(), 1);
    assert_eq!(collector.samples(), 1);

    root.cancel();
    collector.stop().await;
}

#[tokio::test]
async fn test_minimum_interval_bounds_cadence() {
    let root = CancellationToken::new();
    let cell = Arc::new(LatestCell::<u8>::new());
    let collector = IndependentCollector::spawn(
        FnSource::new("slow", |_: &CancellationToken| Some(1u8)),
        cell,
        Duration::from_secs(5),
        Duration::from_secs(10),
        &root,
    );

    assert_eq!(collector.effective_interval(), Duration::from_secs(10));

    collector.set_cadence(Duration::from_secs(2));
    assert_eq!(collector.effective_interval(), Duration::from_secs(10));

    collector.set_cadence(Duration::from_secs(30));
    assert_eq!(collector.effective_interval(), Duration::from_secs(30));

    collector.stop().await;
}

#[tokio::test]
async fn test_parent_cancellation_stops_loop() {
    let root = CancellationToken::new();
    let cell = Arc::new(LatestCell::new());
    let collector = IndependentCollector::spawn(
        FnSource::new("ticker", |_: &CancellationToken| Some(())),
        Arc::clone(&cell),
        MIN_CADENCE,
        Duration::ZERO,
        &root,
    );

    root.cancel();
    assert!(!collector.is_running());
    collector.stop().await;
    collector.stop().await;
}
