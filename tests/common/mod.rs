//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use forecast_stream::clock::FixedClock;
use forecast_stream::consumer::{
    ConsumerConfig, ForecastProcessor, MemoryStream, ReadCursor, RetryPolicy, StreamConsumer,
};
use forecast_stream::event::{ForecastPoint, NewMeasurement, Snapshot, StoredMeasurement};
use forecast_stream::forecast::{
    ForecastEngine, ForecastError, HistoryPoint, MovingAverageEngine, PredictedPoint,
};
use forecast_stream::recompute::Recomputer;
use forecast_stream::repository::{
    DateRange, InMemoryRepository, Repository, RepositoryError, RepositoryResult,
};
use forecast_stream::snapshot::{CacheError, CacheResult, InMemorySnapshotCache, SnapshotCache};

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

/// Clock pinned to 2024-01-03 09:00 UTC
pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap()))
}

pub fn test_config(threshold: u32) -> ConsumerConfig {
    ConsumerConfig::builder()
        .batch_threshold(threshold)
        .poll_block_timeout(Duration::from_millis(10))
        .transport_retry(RetryPolicy::fixed(None, Duration::from_millis(5)))
        .replay_pending_on_start(false)
        .build()
}

/// Delegates to a moving average and records every history it is given
#[derive(Default)]
pub struct RecordingEngine {
    inner: MovingAverageEngine,
    calls: Mutex<Vec<Vec<HistoryPoint>>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<Vec<HistoryPoint>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl ForecastEngine for RecordingEngine {
    fn fit_and_predict(
        &self,
        history: &[HistoryPoint],
        horizon_days: u32,
    ) -> Result<Vec<PredictedPoint>, ForecastError> {
        self.calls.lock().push(history.to_vec());
        self.inner.fit_and_predict(history, horizon_days)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails the first `n` fits, then behaves like a moving average
pub struct FailFirstEngine {
    remaining: AtomicU32,
    inner: MovingAverageEngine,
}

impl FailFirstEngine {
    pub fn new(n: u32) -> Self {
        Self {
            remaining: AtomicU32::new(n),
            inner: MovingAverageEngine::default(),
        }
    }
}

impl ForecastEngine for FailFirstEngine {
    fn fit_and_predict(
        &self,
        history: &[HistoryPoint],
        horizon_days: u32,
    ) -> Result<Vec<PredictedPoint>, ForecastError> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ForecastError::Model("solver did not converge".to_string()));
        }
        self.inner.fit_and_predict(history, horizon_days)
    }

    fn name(&self) -> &str {
        "fail-first"
    }
}

/// Cache whose writes always fail
#[derive(Default)]
pub struct FailingCache;

#[async_trait]
impl SnapshotCache for FailingCache {
    async fn set(&self, _snapshot: &Snapshot) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _entity_id: &str) -> CacheResult<Option<Snapshot>> {
        Ok(None)
    }
}

/// In-memory repository whose next `n` measurement appends fail
#[derive(Default)]
pub struct FlakyRepository {
    pub inner: InMemoryRepository,
    failing_appends: AtomicU32,
}

impl FlakyRepository {
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for FlakyRepository {
    async fn append_measurement(
        &self,
        measurement: NewMeasurement,
    ) -> RepositoryResult<StoredMeasurement> {
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Unavailable("database is locked".to_string()));
        }
        self.inner.append_measurement(measurement).await
    }

    async fn contains_measurement(&self, dedup_key: &str) -> RepositoryResult<bool> {
        self.inner.contains_measurement(dedup_key).await
    }

    async fn append_forecast_points(&self, points: &[ForecastPoint]) -> RepositoryResult<usize> {
        self.inner.append_forecast_points(points).await
    }

    async fn query_history(&self, entity_id: &str) -> RepositoryResult<Vec<StoredMeasurement>> {
        self.inner.query_history(entity_id).await
    }

    async fn query_forecasts(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> RepositoryResult<Vec<ForecastPoint>> {
        self.inner.query_forecasts(entity_id, range).await
    }
}

/// A consumer over a memory stream with handles to every collaborator
pub struct Pipeline<R: Repository + 'static = InMemoryRepository> {
    pub stream: MemoryStream,
    pub repository: Arc<R>,
    pub cache: Arc<InMemorySnapshotCache>,
    pub clock: Arc<FixedClock>,
    pub consumer: StreamConsumer<MemoryStream, ForecastProcessor>,
    pub shutdown: CancellationToken,
}

pub fn pipeline(config: ConsumerConfig, engine: Arc<dyn ForecastEngine>) -> Pipeline {
    pipeline_with(config, engine, Arc::new(InMemoryRepository::new()), None)
}

pub fn pipeline_with<R: Repository + 'static>(
    config: ConsumerConfig,
    engine: Arc<dyn ForecastEngine>,
    repository: Arc<R>,
    cache_override: Option<Arc<dyn SnapshotCache>>,
) -> Pipeline<R> {
    let stream = MemoryStream::new();
    let cache = Arc::new(InMemorySnapshotCache::new());
    let clock = fixed_clock();

    let snapshot_target: Arc<dyn SnapshotCache> = match cache_override {
        Some(custom) => custom,
        None => cache.clone(),
    };
    let recomputer = Recomputer::new(
        repository.clone(),
        snapshot_target,
        engine,
        clock.clone(),
        config.forecast_horizon_days,
    );
    let processor = ForecastProcessor::new(
        repository.clone(),
        recomputer,
        clock.clone(),
        config.batch_threshold,
    )
    .with_deduplication(config.deduplicate);

    let shutdown = CancellationToken::new();
    let consumer = StreamConsumer::new(config, stream.clone(), processor, shutdown.clone());

    Pipeline {
        stream,
        repository,
        cache,
        clock,
        consumer,
        shutdown,
    }
}

impl<R: Repository + 'static> Pipeline<R> {
    /// Poll until a read of new entries returns nothing (at most 100 polls)
    pub async fn drain(&mut self) -> usize {
        self.consumer
            .ensure_group()
            .await
            .expect("group creation should succeed");
        let mut total = 0;
        for _ in 0..100 {
            let cursor = self.consumer.cursor();
            match self.consumer.run_once().await {
                Ok(0) if cursor == ReadCursor::New => break,
                Ok(0) => continue,
                Ok(n) => total += n,
                Err(_) => continue,
            }
        }
        total
    }
}

/// Publish a complete wire-format event
pub fn publish(stream: &MemoryStream, entity: &str, day: u32, value: u64) -> String {
    stream.publish([
        ("entity_id", entity.to_string()),
        ("ds", date(day).to_string()),
        ("y", value.to_string()),
        ("capacity", "100".to_string()),
        ("distance", "1.5".to_string()),
    ])
}
