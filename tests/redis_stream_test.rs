//! Adapters against a live Redis server
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379/ cargo test -- --ignored`.

use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use forecast_stream::consumer::{
    ConsumerConfig, EventStream, GroupStatus, ReadCursor, RedisEventStream,
};
use forecast_stream::event::Event;
use forecast_stream::snapshot::{RedisSnapshotCache, SnapshotCache};
use forecast_stream::Snapshot;
use rand::Rng;

fn redis_endpoint() -> (String, u16) {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
    let rest = url.trim_start_matches("redis://").trim_end_matches('/');
    let (host, port) = rest.split_once(':').unwrap_or((rest, "6379"));
    (host.to_string(), port.parse().unwrap())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{:08x}", rand::thread_rng().gen::<u32>())
}

fn live_config() -> ConsumerConfig {
    let (host, port) = redis_endpoint();
    ConsumerConfig::builder()
        .redis_host(host)
        .redis_port(port)
        .stream_key(unique("visits_test"))
        .group_name(unique("group"))
        .build()
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_group_poll_and_ack_round() {
    let config = live_config();
    let stream = RedisEventStream::connect(&config).await.unwrap();

    assert_eq!(stream.ensure_group().await.unwrap(), GroupStatus::Created);
    assert_eq!(stream.ensure_group().await.unwrap(), GroupStatus::AlreadyExists);

    let event = Event {
        entity_id: "A".to_string(),
        timestamp: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        value: 7,
        capacity: 50,
        distance: 2.5,
    };
    let id = stream.publish(&event.to_fields()).await.unwrap();

    let block = Duration::from_millis(200);
    let messages = stream.poll(ReadCursor::New, 10, block).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    assert_eq!(Event::from_fields(&messages[0].fields, today).unwrap(), event);

    // Unacknowledged entries come back on the pending cursor
    let pending = stream.poll(ReadCursor::Pending, 10, block).await.unwrap();
    assert_eq!(pending.len(), 1);

    stream.ack(&id).await.unwrap();
    assert!(stream.poll(ReadCursor::Pending, 10, block).await.unwrap().is_empty());
    assert!(stream.poll(ReadCursor::New, 10, block).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_snapshot_cache_overwrites() {
    let config = live_config();
    let prefix = format!("{}:", unique("snapshot_test"));
    let cache = RedisSnapshotCache::connect_with_prefix(&config.redis_url(), &prefix)
        .await
        .unwrap();

    assert!(cache.get("A").await.unwrap().is_none());

    let mut snapshot = Snapshot {
        entity_id: "A".to_string(),
        next_date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
        next_point_estimate: 10.5,
        generated_at: Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap(),
    };
    cache.set(&snapshot).await.unwrap();
    snapshot.next_point_estimate = 11.0;
    cache.set(&snapshot).await.unwrap();

    assert_eq!(cache.get("A").await.unwrap(), Some(snapshot));
}
