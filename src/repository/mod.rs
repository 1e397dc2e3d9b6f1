//! Durable storage for raw measurements and computed forecasts
//!
//! Both tables are append-only. Every write has committed by the time the
//! call returns; the consumer acknowledges a message only after
//! [`Repository::append_measurement`] succeeds.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::event::{ForecastPoint, NewMeasurement, StoredMeasurement};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQLite driver errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be mapped back into its domain type
    #[error("Corrupt row: column `{column}`: {reason}")]
    Corrupt { column: &'static str, reason: String },

    /// Store temporarily unreachable
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `start` and the following `days` days
    pub fn starting_at(start: NaiveDate, days: u32) -> Self {
        let end = start
            .checked_add_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Append-and-query store used by the pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist one measurement and return it with its surrogate id
    async fn append_measurement(
        &self,
        measurement: NewMeasurement,
    ) -> RepositoryResult<StoredMeasurement>;

    /// Whether a measurement with this dedup key has been stored
    async fn contains_measurement(&self, dedup_key: &str) -> RepositoryResult<bool>;

    /// Persist a forecast generation in one transaction, returning the row count
    async fn append_forecast_points(&self, points: &[ForecastPoint]) -> RepositoryResult<usize>;

    /// Full history for `entity_id`, ascending by timestamp then id
    async fn query_history(&self, entity_id: &str) -> RepositoryResult<Vec<StoredMeasurement>>;

    /// Forecast rows for `entity_id` whose target date is in `range`,
    /// ascending by target date then generation time
    async fn query_forecasts(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> RepositoryResult<Vec<ForecastPoint>>;
}
