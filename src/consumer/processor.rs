//! Message processor trait and the forecasting pipeline processor

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use super::error::ConsumerResult;
use super::stream::StreamMessage;
use crate::clock::Clock;
use crate::event::{Event, NewMeasurement};
use crate::recompute::{RecomputeOutcome, Recomputer};
use crate::repository::Repository;
use crate::tracker::BatchTracker;

/// What happened to a message; every variant is acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Measurement stored under `measurement_id`
    Persisted {
        entity_id: String,
        measurement_id: i64,
    },
    /// Malformed payload, acknowledged without persisting
    Dropped { reason: String },
    /// Dedup key already stored, acknowledged without persisting
    Duplicate { entity_id: String },
}

/// Handles one stream message at a time
///
/// An `Err` from [`process`](MessageProcessor::process) leaves the message
/// unacknowledged so it is delivered again.
#[async_trait]
pub trait MessageProcessor: Send {
    /// Process a single message
    async fn process(&mut self, message: &StreamMessage) -> ConsumerResult<Disposition>;

    /// Called once the message behind `disposition` has been handled
    async fn after_ack(&mut self, disposition: &Disposition) -> Option<RecomputeOutcome>;

    /// Get processor name for logs
    fn name(&self) -> &str {
        "MessageProcessor"
    }
}

/// Persists measurements, counts them per entity, and recomputes forecasts
/// when an entity reaches the batch threshold
pub struct ForecastProcessor {
    repository: Arc<dyn Repository>,
    recomputer: Recomputer,
    tracker: BatchTracker,
    clock: Arc<dyn Clock>,
    deduplicate: bool,
}

impl ForecastProcessor {
    pub fn new(
        repository: Arc<dyn Repository>,
        recomputer: Recomputer,
        clock: Arc<dyn Clock>,
        batch_threshold: u32,
    ) -> Self {
        Self {
            repository,
            recomputer,
            tracker: BatchTracker::new(batch_threshold),
            clock,
            deduplicate: false,
        }
    }

    /// Skip measurements whose dedup key is already stored
    pub fn with_deduplication(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    pub fn tracker(&self) -> &BatchTracker {
        &self.tracker
    }

    async fn maybe_trigger(&mut self, entity_id: &str) -> Option<RecomputeOutcome> {
        if !self.tracker.is_due(entity_id) {
            return None;
        }
        let outcome = self.recomputer.run(entity_id).await;
        // Reset regardless of outcome; a failed forecast waits for the next crossing
        self.tracker.reset(entity_id);
        Some(outcome)
    }
}

#[async_trait]
impl MessageProcessor for ForecastProcessor {
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    async fn process(&mut self, message: &StreamMessage) -> ConsumerResult<Disposition> {
        let event = match Event::from_fields(&message.fields, self.clock.today()) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, fields = ?message.fields, "dropping malformed message");
                return Ok(Disposition::Dropped {
                    reason: e.to_string(),
                });
            }
        };

        let measurement = NewMeasurement::new(event, self.clock.now());
        if self.deduplicate
            && self
                .repository
                .contains_measurement(&measurement.dedup_key)
                .await?
        {
            info!(
                entity_id = %measurement.event.entity_id,
                dedup_key = %measurement.dedup_key,
                "skipping duplicate measurement"
            );
            return Ok(Disposition::Duplicate {
                entity_id: measurement.event.entity_id,
            });
        }

        let stored = self.repository.append_measurement(measurement).await?;
        let count = self.tracker.record(&stored.entity_id);
        debug!(
            entity_id = %stored.entity_id,
            measurement_id = stored.id,
            count,
            threshold = self.tracker.threshold(),
            "persisted measurement"
        );

        Ok(Disposition::Persisted {
            entity_id: stored.entity_id,
            measurement_id: stored.id,
        })
    }

    async fn after_ack(&mut self, disposition: &Disposition) -> Option<RecomputeOutcome> {
        match disposition {
            Disposition::Persisted { entity_id, .. } => self.maybe_trigger(entity_id).await,
            Disposition::Dropped { .. } | Disposition::Duplicate { .. } => None,
        }
    }

    fn name(&self) -> &str {
        "ForecastProcessor"
    }
}
