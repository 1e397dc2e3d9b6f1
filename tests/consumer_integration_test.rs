//! Consumer loop driven end to end over an in-memory stream

mod common;

use std::sync::Arc;
use std::time::Duration;

use forecast_stream::clock::Clock;
use forecast_stream::consumer::{EventStream, ReadCursor};
use forecast_stream::repository::{DateRange, Repository};
use forecast_stream::snapshot::SnapshotCache;
use pretty_assertions::assert_eq;

use common::{
    date, pipeline, pipeline_with, publish, test_config, FailFirstEngine, FailingCache,
    FlakyRepository, RecordingEngine,
};

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn test_three_events_trigger_one_recompute() {
    let engine = Arc::new(RecordingEngine::default());
    let mut p = pipeline(test_config(3), engine.clone());

    for (day, value) in [(1, 10), (2, 12), (3, 9)] {
        publish(&p.stream, "A", day, value);
    }
    p.drain().await;

    let history = p.repository.query_history("A").await.unwrap();
    let values: Vec<u64> = history.iter().map(|m| m.value).collect();
    let dates: Vec<_> = history.iter().map(|m| m.timestamp).collect();
    assert_eq!(values, vec![10, 12, 9]);
    assert_eq!(dates, vec![date(1), date(2), date(3)]);

    assert_eq!(engine.call_count(), 1);
    let fitted: Vec<f64> = engine.calls()[0].iter().map(|h| h.value).collect();
    assert_eq!(fitted, vec![10.0, 12.0, 9.0]);

    assert_eq!(p.repository.forecast_count(), 14);
    assert!(p.cache.get("A").await.unwrap().is_some());
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);
    assert_eq!(p.stream.acked_ids().len(), 3);
    assert_eq!(p.stream.pending_count(), 0);
}

#[tokio::test]
async fn test_threshold_fires_exactly_on_the_nth_event() {
    let engine = Arc::new(RecordingEngine::default());
    let mut p = pipeline(test_config(4), engine.clone());

    for day in 1..=3 {
        publish(&p.stream, "A", day, 5);
    }
    p.drain().await;
    assert_eq!(engine.call_count(), 0);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 3);

    publish(&p.stream, "A", 4, 5);
    p.drain().await;
    assert_eq!(engine.call_count(), 1);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);

    for day in 5..=7 {
        publish(&p.stream, "A", day, 5);
    }
    p.drain().await;
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn test_unparseable_date_uses_today() {
    let mut p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    let id = p
        .stream
        .publish([("entity_id", "A"), ("ds", "not-a-date"), ("y", "5")]);
    p.drain().await;

    let history = p.repository.query_history("A").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp, p.clock.today());
    assert_eq!(history[0].value, 5);
    assert_eq!(p.stream.acked_ids(), vec![id]);
}

#[tokio::test]
async fn test_missing_numeric_fields_use_defaults_and_count() {
    let mut p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    p.stream.publish([("entity_id", "B")]);
    p.drain().await;

    let history = p.repository.query_history("B").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, 0);
    assert_eq!(history[0].capacity, 100);
    assert_eq!(history[0].distance, 1.0);
    assert_eq!(history[0].timestamp, date(3));
    assert_eq!(p.consumer.processor().tracker().pending("B"), 1);
}

#[tokio::test]
async fn test_aliased_field_names_are_accepted() {
    let mut p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    p.stream.publish([
        ("nama_faskes", "Puskesmas Kota"),
        ("ds", "2024-01-02"),
        ("y", "17"),
        ("kapasitas", "250"),
        ("jarak", "3.5"),
    ]);
    p.drain().await;

    let history = p.repository.query_history("Puskesmas Kota").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].capacity, 250);
    assert_eq!(history[0].distance, 3.5);
}

#[tokio::test]
async fn test_message_without_entity_is_acked_and_dropped() {
    let mut p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    let id = p.stream.publish([("ds", "2024-01-01"), ("y", "4")]);
    let bad_value = p.stream.publish([("entity_id", "A"), ("y", "-3")]);
    p.drain().await;

    assert_eq!(p.repository.measurement_count(), 0);
    assert_eq!(p.stream.acked_ids(), vec![id, bad_value]);
    assert_eq!(p.stream.pending_count(), 0);
    assert_eq!(p.consumer.metrics().snapshot().dropped, 2);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);
}

#[tokio::test]
async fn test_redelivery_stores_at_most_twice() {
    let engine = Arc::new(RecordingEngine::default());
    let mut p = pipeline(test_config(3), engine.clone());
    p.consumer.ensure_group().await.unwrap();

    let id = publish(&p.stream, "A", 1, 10);
    p.stream.fail_next_acks(1);

    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert_eq!(p.repository.measurement_count(), 1);
    assert_eq!(p.stream.pending_count(), 1);
    assert_eq!(p.consumer.cursor(), ReadCursor::Pending);

    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert_eq!(p.repository.measurement_count(), 2);
    assert_eq!(p.stream.pending_count(), 0);
    assert_eq!(p.stream.delivery_count(&id), 2);
    // One extra count from the duplicate
    assert_eq!(p.consumer.processor().tracker().pending("A"), 2);

    publish(&p.stream, "A", 2, 12);
    p.drain().await;
    assert_eq!(engine.call_count(), 1);
    assert_eq!(engine.calls()[0].len(), 3);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);
}

#[tokio::test]
async fn test_deduplication_suppresses_redelivered_measurement() {
    let mut config = test_config(3);
    config.deduplicate = true;
    let mut p = pipeline(config, Arc::new(RecordingEngine::default()));
    p.consumer.ensure_group().await.unwrap();

    publish(&p.stream, "A", 1, 10);
    p.stream.fail_next_acks(1);
    p.drain().await;

    assert_eq!(p.repository.measurement_count(), 1);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 1);
    assert_eq!(p.consumer.metrics().snapshot().duplicates, 1);
    assert_eq!(p.stream.pending_count(), 0);
}

#[tokio::test]
async fn test_forecast_failure_does_not_block_other_entities() {
    let mut p = pipeline(test_config(2), Arc::new(FailFirstEngine::new(1)));

    publish(&p.stream, "A", 1, 3);
    publish(&p.stream, "A", 2, 4);
    publish(&p.stream, "B", 1, 7);
    publish(&p.stream, "B", 2, 8);
    p.drain().await;

    assert!(p.cache.get("A").await.unwrap().is_none());
    assert!(p.cache.get("B").await.unwrap().is_some());
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);
    assert_eq!(p.consumer.processor().tracker().pending("B"), 0);
    assert_eq!(p.stream.acked_ids().len(), 4);

    let metrics = p.consumer.metrics().snapshot();
    assert_eq!(metrics.recomputes, 2);
    assert_eq!(metrics.recompute_failures, 1);

    // A recovers at its next threshold crossing
    publish(&p.stream, "A", 3, 5);
    publish(&p.stream, "A", 4, 6);
    p.drain().await;
    assert!(p.cache.get("A").await.unwrap().is_some());
}

#[tokio::test]
async fn test_snapshot_holds_tomorrows_estimate() {
    let mut p = pipeline(test_config(3), Arc::new(RecordingEngine::default()));
    let started = p.clock.now();

    for (day, value) in [(1, 10), (2, 12), (3, 9)] {
        publish(&p.stream, "A", day, value);
    }
    p.drain().await;

    let snapshot = p.cache.get("A").await.unwrap().unwrap();
    assert!(snapshot.generated_at >= started);
    assert_eq!(snapshot.next_date, date(4));

    let stored = p
        .repository
        .query_forecasts("A", DateRange::new(date(4), date(4)))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(snapshot.next_point_estimate, stored[0].point_estimate);
}

#[tokio::test]
async fn test_cache_failure_keeps_forecast_rows() {
    let repository = Arc::new(forecast_stream::repository::InMemoryRepository::new());
    let mut p = pipeline_with(
        test_config(3),
        Arc::new(RecordingEngine::default()),
        repository,
        Some(Arc::new(FailingCache)),
    );

    for day in 1..=3 {
        publish(&p.stream, "A", day, 10);
    }
    publish(&p.stream, "B", 1, 2);
    p.drain().await;

    assert_eq!(p.repository.forecast_count(), 14);
    assert_eq!(p.repository.query_history("B").await.unwrap().len(), 1);
    assert_eq!(p.stream.acked_ids().len(), 4);
    assert_eq!(p.consumer.metrics().snapshot().recompute_failures, 0);
}

#[tokio::test]
async fn test_persistence_failure_leaves_message_pending_until_retried() {
    let repository = Arc::new(FlakyRepository::default());
    repository.fail_next_appends(1);
    let mut p = pipeline_with(
        test_config(5),
        Arc::new(RecordingEngine::default()),
        repository.clone(),
        None,
    );
    p.consumer.ensure_group().await.unwrap();
    let id = publish(&p.stream, "A", 1, 10);

    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert!(p.stream.acked_ids().is_empty());
    assert_eq!(p.stream.pending_count(), 1);
    assert_eq!(repository.inner.measurement_count(), 0);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 0);
    assert_eq!(p.consumer.cursor(), ReadCursor::Pending);
    assert_eq!(p.consumer.metrics().snapshot().persistence_failures, 1);

    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert_eq!(p.stream.acked_ids(), vec![id.clone()]);
    assert_eq!(repository.inner.measurement_count(), 1);
    assert_eq!(p.stream.delivery_count(&id), 2);
    assert_eq!(p.consumer.processor().tracker().pending("A"), 1);
}

#[tokio::test]
async fn test_pending_entries_are_replayed_on_start() {
    let mut config = test_config(5);
    config.replay_pending_on_start = true;
    let mut p = pipeline(config, Arc::new(RecordingEngine::default()));
    p.consumer.ensure_group().await.unwrap();

    // A previous run took the entry and crashed before acknowledging it
    let id = publish(&p.stream, "A", 1, 10);
    p.stream
        .poll(ReadCursor::New, 10, Duration::from_millis(1))
        .await
        .unwrap();
    publish(&p.stream, "A", 2, 11);

    assert_eq!(p.consumer.cursor(), ReadCursor::Pending);
    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert_eq!(p.stream.acked_ids(), vec![id]);

    assert_eq!(p.consumer.run_once().await.unwrap(), 0);
    assert_eq!(p.consumer.cursor(), ReadCursor::New);
    assert_eq!(p.consumer.run_once().await.unwrap(), 1);
    assert_eq!(p.repository.measurement_count(), 2);
}

#[tokio::test]
async fn test_run_stops_promptly_on_cancellation() {
    let mut config = test_config(20);
    config.poll_block_timeout = Duration::from_secs(30);
    let p = pipeline(config, Arc::new(RecordingEngine::default()));
    let stream = p.stream.clone();
    let shutdown = p.shutdown.clone();
    let mut consumer = p.consumer;

    publish(&stream, "A", 1, 1);
    publish(&stream, "A", 2, 2);
    let handle = tokio::spawn(async move { consumer.run().await });

    wait_until(|| stream.acked_ids().len() == 2).await;
    shutdown.cancel();

    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("consumer should stop while blocked in poll")
        .unwrap()
        .unwrap();
    assert_eq!(report.metrics.consumed, 2);
    assert_eq!(report.metrics.acked, 2);
    assert_eq!(p.repository.measurement_count(), 2);
}

#[tokio::test]
async fn test_run_recovers_from_transport_errors() {
    let p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    let stream = p.stream.clone();
    let shutdown = p.shutdown.clone();
    let mut consumer = p.consumer;

    stream.fail_next_group_creations(2);
    stream.fail_next_polls(3);
    publish(&stream, "A", 1, 1);

    let handle = tokio::spawn(async move { consumer.run().await });
    wait_until(|| stream.acked_ids().len() == 1).await;
    shutdown.cancel();

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.metrics.transport_errors, 3);
    assert_eq!(report.metrics.persisted, 1);
}

#[tokio::test]
async fn test_run_recreates_a_lost_group() {
    let p = pipeline(test_config(20), Arc::new(RecordingEngine::default()));
    let stream = p.stream.clone();
    let shutdown = p.shutdown.clone();
    let mut consumer = p.consumer;

    publish(&stream, "A", 1, 1);
    let handle = tokio::spawn(async move { consumer.run().await });
    wait_until(|| stream.acked_ids().len() == 1).await;

    // Stream key deleted or Redis restarted without persistence
    stream.destroy_group();
    let second = publish(&stream, "A", 2, 2);
    wait_until(|| stream.acked_ids().contains(&second)).await;
    shutdown.cancel();

    let report = handle.await.unwrap().unwrap();
    assert_eq!(stream.groups_created(), 2);
    assert!(report.metrics.transport_errors >= 1);
    // The re-created group starts from the beginning, so the first entry comes back
    assert_eq!(p.repository.measurement_count(), 3);
    assert_eq!(stream.pending_count(), 0);
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let mut config = test_config(20);
    config.stream_key = String::new();
    let mut p = pipeline(config, Arc::new(RecordingEngine::default()));

    let err = p.consumer.run().await.unwrap_err();
    assert!(err.to_string().contains("Stream key"));
}
