//! Process-local repository for tests and dry runs

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DateRange, Repository, RepositoryResult};
use crate::event::{ForecastPoint, NewMeasurement, StoredMeasurement};

#[derive(Debug, Default)]
struct Tables {
    measurements: Vec<StoredMeasurement>,
    forecasts: Vec<ForecastPoint>,
}

/// Repository held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurement_count(&self) -> usize {
        self.tables.read().measurements.len()
    }

    pub fn forecast_count(&self) -> usize {
        self.tables.read().forecasts.len()
    }

    /// Every forecast row for `entity_id` in insertion order
    pub fn forecasts_for(&self, entity_id: &str) -> Vec<ForecastPoint> {
        self.tables
            .read()
            .forecasts
            .iter()
            .filter(|p| p.entity_id == entity_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn append_measurement(
        &self,
        measurement: NewMeasurement,
    ) -> RepositoryResult<StoredMeasurement> {
        let mut tables = self.tables.write();
        let id = tables.measurements.len() as i64 + 1;
        let stored = StoredMeasurement::from_new(id, measurement);
        tables.measurements.push(stored.clone());
        Ok(stored)
    }

    async fn contains_measurement(&self, dedup_key: &str) -> RepositoryResult<bool> {
        Ok(self
            .tables
            .read()
            .measurements
            .iter()
            .any(|m| m.dedup_key == dedup_key))
    }

    async fn append_forecast_points(&self, points: &[ForecastPoint]) -> RepositoryResult<usize> {
        self.tables.write().forecasts.extend_from_slice(points);
        Ok(points.len())
    }

    async fn query_history(&self, entity_id: &str) -> RepositoryResult<Vec<StoredMeasurement>> {
        let mut rows: Vec<StoredMeasurement> = self
            .tables
            .read()
            .measurements
            .iter()
            .filter(|m| m.entity_id == entity_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn query_forecasts(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> RepositoryResult<Vec<ForecastPoint>> {
        let mut rows: Vec<ForecastPoint> = self
            .tables
            .read()
            .forecasts
            .iter()
            .filter(|p| p.entity_id == entity_id && range.contains(p.target_date))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.target_date
                .cmp(&b.target_date)
                .then(a.generated_at.cmp(&b.generated_at))
        });
        Ok(rows)
    }
}
