//! Consumer pipeline over a SQLite file

mod common;

use std::sync::Arc;

use forecast_stream::clock::Clock;
use forecast_stream::forecast::latest_generation;
use forecast_stream::repository::{DateRange, Repository, SqliteRepository};
use forecast_stream::snapshot::SnapshotCache;
use pretty_assertions::assert_eq;

use common::{date, pipeline_with, publish, test_config, RecordingEngine};

#[tokio::test]
async fn test_recomputes_append_generations_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.db");
    let repository = Arc::new(SqliteRepository::open(&path).unwrap());
    let mut p = pipeline_with(
        test_config(3),
        Arc::new(RecordingEngine::default()),
        repository,
        None,
    );

    for (day, value) in [(1, 10), (2, 12), (3, 9)] {
        publish(&p.stream, "A", day, value);
    }
    p.drain().await;
    let first_generation = p.clock.now();

    p.clock.advance(chrono::Duration::hours(1));
    // Corrections for the same days arrive later
    for (day, value) in [(1, 11), (2, 13), (3, 10)] {
        publish(&p.stream, "A", day, value);
    }
    p.drain().await;
    let second_generation = p.clock.now();

    assert_eq!(p.repository.query_history("A").await.unwrap().len(), 6);

    let range = DateRange::starting_at(date(4), 14);
    let rows = p.repository.query_forecasts("A", range).await.unwrap();
    assert_eq!(rows.len(), 28);
    assert!(rows.iter().any(|r| r.generated_at == first_generation));

    let latest = latest_generation(&rows);
    assert_eq!(latest.len(), 14);
    assert!(latest.iter().all(|r| r.generated_at == second_generation));
    assert_eq!(latest[0].target_date, date(4));

    let snapshot = p.cache.get("A").await.unwrap().unwrap();
    assert_eq!(snapshot.generated_at, second_generation);
    assert_eq!(snapshot.next_point_estimate, latest[0].point_estimate);
}

#[tokio::test]
async fn test_measurements_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db");

    {
        let repository = Arc::new(SqliteRepository::open(&path).unwrap());
        let mut p = pipeline_with(
            test_config(20),
            Arc::new(RecordingEngine::default()),
            repository,
            None,
        );
        publish(&p.stream, "A", 2, 4);
        publish(&p.stream, "A", 1, 3);
        p.drain().await;
    }

    let reopened = SqliteRepository::open(&path).unwrap();
    let history = reopened.query_history("A").await.unwrap();
    let dates: Vec<_> = history.iter().map(|m| m.timestamp).collect();
    assert_eq!(dates, vec![date(1), date(2)]);
    assert!(history[0].id != history[1].id);
}
