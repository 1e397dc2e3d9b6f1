//! Recompute an entity's forecast and publish it
//!
//! Steps: load full history, fit, append the generation to the repository,
//! then overwrite the entity's snapshot. Every failure is reported through
//! [`RecomputeOutcome`]; nothing here propagates an error to the consumer
//! loop, because the triggering events are already acknowledged.

use std::sync::Arc;

use chrono::{DateTime, Days, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::event::{ForecastPoint, Snapshot};
use crate::forecast::{ForecastEngine, HistoryPoint, PredictedPoint};
use crate::repository::Repository;
use crate::snapshot::SnapshotCache;

/// Default forecast horizon
pub const DEFAULT_HORIZON_DAYS: u32 = 14;

/// Result of one recompute pass
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// Forecast stored; `cache_written` is false when only the snapshot write failed
    Published {
        entity_id: String,
        points: usize,
        snapshot: Snapshot,
        cache_written: bool,
    },
    /// No stored history for the entity
    EmptyHistory,
    /// Engine reported an error
    ForecastFailed { reason: String },
    /// Engine succeeded but produced no points
    EngineReturnedNothing,
    /// History could not be loaded
    HistoryUnavailable { reason: String },
    /// Forecast rows could not be persisted
    StoreFailed { reason: String },
}

impl RecomputeOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, RecomputeOutcome::Published { .. })
    }
}

/// Runs the recompute procedure against shared collaborators
pub struct Recomputer {
    repository: Arc<dyn Repository>,
    cache: Arc<dyn SnapshotCache>,
    engine: Arc<dyn ForecastEngine>,
    clock: Arc<dyn Clock>,
    horizon_days: u32,
}

impl Recomputer {
    pub fn new(
        repository: Arc<dyn Repository>,
        cache: Arc<dyn SnapshotCache>,
        engine: Arc<dyn ForecastEngine>,
        clock: Arc<dyn Clock>,
        horizon_days: u32,
    ) -> Self {
        Self {
            repository,
            cache,
            engine,
            clock,
            horizon_days,
        }
    }

    #[instrument(skip(self), fields(engine = %self.engine.name(), horizon = self.horizon_days))]
    pub async fn run(&self, entity_id: &str) -> RecomputeOutcome {
        let started_at = self.clock.now();

        let history = match self.repository.query_history(entity_id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(entity_id = %entity_id, error = %e, "failed to load history for recompute");
                return RecomputeOutcome::HistoryUnavailable {
                    reason: e.to_string(),
                };
            }
        };

        if history.is_empty() {
            warn!(entity_id = %entity_id, "no history, skipping recompute");
            return RecomputeOutcome::EmptyHistory;
        }

        let series: Vec<HistoryPoint> = history.iter().map(HistoryPoint::from).collect();
        debug!(entity_id = %entity_id, rows = series.len(), "fitting forecast");

        let predicted = match self.engine.fit_and_predict(&series, self.horizon_days) {
            Ok(points) => points,
            Err(e) => {
                error!(entity_id = %entity_id, error = %e, "forecast engine failed");
                return RecomputeOutcome::ForecastFailed {
                    reason: e.to_string(),
                };
            }
        };

        if predicted.is_empty() {
            warn!(entity_id = %entity_id, "forecast engine returned no points");
            return RecomputeOutcome::EngineReturnedNothing;
        }

        let rows: Vec<ForecastPoint> = predicted
            .iter()
            .map(|p| ForecastPoint {
                entity_id: entity_id.to_string(),
                target_date: p.target_date,
                point_estimate: p.point_estimate,
                lower_bound: p.lower_bound,
                upper_bound: p.upper_bound,
                generated_at: started_at,
            })
            .collect();

        let stored = match self.repository.append_forecast_points(&rows).await {
            Ok(n) => n,
            Err(e) => {
                error!(entity_id = %entity_id, error = %e, "failed to persist forecast");
                return RecomputeOutcome::StoreFailed {
                    reason: e.to_string(),
                };
            }
        };

        let snapshot = self.snapshot_for(entity_id, &predicted, started_at);
        let cache_written = match self.cache.set(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                // Repository already holds the authoritative rows
                warn!(entity_id = %entity_id, error = %e, "failed to write snapshot, cache is stale");
                false
            }
        };

        info!(
            entity_id = %entity_id,
            points = stored,
            next_date = %snapshot.next_date,
            next_estimate = snapshot.next_point_estimate,
            "published forecast"
        );

        RecomputeOutcome::Published {
            entity_id: entity_id.to_string(),
            points: stored,
            snapshot,
            cache_written,
        }
    }

    /// Snapshot dated tomorrow; the estimate is tomorrow's point if present,
    /// otherwise the first point. `predicted` is never empty here.
    fn snapshot_for(
        &self,
        entity_id: &str,
        predicted: &[PredictedPoint],
        generated_at: DateTime<Utc>,
    ) -> Snapshot {
        let first = &predicted[0];
        let tomorrow = self.clock.today().checked_add_days(Days::new(1));
        let chosen = predicted
            .iter()
            .find(|p| Some(p.target_date) == tomorrow)
            .unwrap_or(first);

        Snapshot {
            entity_id: entity_id.to_string(),
            next_date: tomorrow.unwrap_or(first.target_date),
            next_point_estimate: chosen.point_estimate,
            generated_at,
        }
    }
}
