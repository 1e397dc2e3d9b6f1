//! Stream-driven measurement ingestion with batch-triggered forecasting
//!
//! Measurements arrive on a Redis stream read through a consumer group.
//! Each one is persisted, acknowledged, and counted against its entity; when
//! an entity accumulates `batch_threshold` new measurements its forecast is
//! recomputed from the full history, appended to durable storage, and the
//! next-day estimate is written to a snapshot cache for fast reads.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use forecast_stream::clock::SystemClock;
//! use forecast_stream::consumer::{ConsumerConfig, ForecastProcessor, RedisEventStream, StreamConsumer};
//! use forecast_stream::forecast::MovingAverageEngine;
//! use forecast_stream::recompute::Recomputer;
//! use forecast_stream::repository::SqliteRepository;
//! use forecast_stream::snapshot::RedisSnapshotCache;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConsumerConfig::default();
//! let repository = Arc::new(SqliteRepository::open("data.db".as_ref())?);
//! let cache = Arc::new(RedisSnapshotCache::connect(&config.redis_url()).await?);
//! let clock = Arc::new(SystemClock);
//!
//! let recomputer = Recomputer::new(
//!     repository.clone(),
//!     cache,
//!     Arc::new(MovingAverageEngine::default()),
//!     clock.clone(),
//!     config.forecast_horizon_days,
//! );
//! let processor = ForecastProcessor::new(repository, recomputer, clock, config.batch_threshold);
//! let stream = RedisEventStream::connect(&config).await?;
//!
//! let shutdown = CancellationToken::new();
//! forecast_stream::consumer::cancel_on_signal(shutdown.clone());
//! StreamConsumer::new(config, stream, processor, shutdown).run().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub use event::{Event, ForecastPoint, NewMeasurement, Snapshot, StoredMeasurement};

/// Wall-clock access
pub mod clock;

/// Redis Streams consumer
pub mod consumer;

/// Data model and wire format
pub mod event;

/// Forecast engines
pub mod forecast;

/// Forecast recomputation and publication
pub mod recompute;

/// Durable storage
pub mod repository;

/// Latest-forecast cache
pub mod snapshot;

/// Tracing subscriber setup
pub mod telemetry;

/// Per-entity batch counters
pub mod tracker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
