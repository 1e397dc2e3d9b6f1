//! Redis Streams consumer for the forecasting pipeline
//!
//! The consumer reads through a consumer group, hands each entry to a
//! [`MessageProcessor`], and acknowledges it only once the processor has
//! persisted it (or decided it can never be persisted). Unacknowledged
//! entries are picked up again through the pending-entry list.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use forecast_stream::clock::SystemClock;
//! use forecast_stream::consumer::{ConsumerConfig, ForecastProcessor, MemoryStream, StreamConsumer};
//! use forecast_stream::forecast::MovingAverageEngine;
//! use forecast_stream::recompute::Recomputer;
//! use forecast_stream::repository::InMemoryRepository;
//! use forecast_stream::snapshot::InMemorySnapshotCache;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConsumerConfig::builder().batch_threshold(3).build();
//! let repository = Arc::new(InMemoryRepository::new());
//! let clock = Arc::new(SystemClock);
//! let recomputer = Recomputer::new(
//!     repository.clone(),
//!     Arc::new(InMemorySnapshotCache::new()),
//!     Arc::new(MovingAverageEngine::default()),
//!     clock.clone(),
//!     config.forecast_horizon_days,
//! );
//! let processor = ForecastProcessor::new(repository, recomputer, clock, config.batch_threshold);
//!
//! let mut consumer = StreamConsumer::new(config, MemoryStream::new(), processor, CancellationToken::new());
//! let report = consumer.run().await?;
//! println!("{}", serde_json::to_string(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
#[allow(clippy::module_inception)]
pub mod consumer;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod processor;
pub mod redis_stream;
pub mod retry;
pub mod shutdown;
pub mod stream;

pub use config::{ConsumerConfig, ConsumerConfigBuilder};
pub use consumer::{ConsumerReport, StreamConsumer};
pub use error::{ConsumerError, ConsumerResult, ErrorSeverity};
pub use memory::MemoryStream;
pub use metrics::{ConsumerMetrics, MetricsSnapshot, ProcessingStats};
pub use processor::{Disposition, ForecastProcessor, MessageProcessor};
pub use redis_stream::RedisEventStream;
pub use retry::{RetryExecutor, RetryPolicy, RetryResult};
pub use shutdown::{cancel_on_signal, wait_for_signal};
pub use stream::{EventStream, GroupStatus, ReadCursor, StreamMessage};
