//! Measurement events and the records derived from them
//!
//! An [`Event`] is one observation for one entity as it arrives on the
//! stream. The repository persists it as a [`StoredMeasurement`]; a
//! recompute pass turns an entity's history into [`ForecastPoint`] rows and
//! a single [`Snapshot`] for the cache.

use std::hash::Hasher;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

mod wire;

pub use wire::{WireError, FIELD_CAPACITY, FIELD_DATE, FIELD_DISTANCE, FIELD_ENTITY, FIELD_VALUE};

/// Default `capacity` when the producer omits it
pub const DEFAULT_CAPACITY: u32 = 100;
/// Default `distance` when the producer omits it
pub const DEFAULT_DISTANCE: f64 = 1.0;

/// One observed measurement for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source identifier, never empty
    pub entity_id: String,
    /// Observation date
    pub timestamp: NaiveDate,
    /// Observed quantity
    pub value: u64,
    /// Static entity attribute, always positive
    pub capacity: u32,
    /// Static entity attribute, never negative
    pub distance: f64,
}

impl Event {
    /// Stable key over `entity_id`, `timestamp` and `value`.
    ///
    /// The stream carries no event id, so this is the only handle for
    /// recognising a re-delivered measurement.
    pub fn dedup_key(&self) -> String {
        let mut hasher = SipHasher13::new();
        hasher.write(self.entity_id.as_bytes());
        hasher.write_u8(0);
        hasher.write(self.timestamp.to_string().as_bytes());
        hasher.write_u8(0);
        hasher.write_u64(self.value);
        format!("{:016x}", hasher.finish())
    }
}

/// A measurement about to be appended to the repository
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub event: Event,
    pub created_at: DateTime<Utc>,
    pub dedup_key: String,
}

impl NewMeasurement {
    pub fn new(event: Event, created_at: DateTime<Utc>) -> Self {
        let dedup_key = event.dedup_key();
        Self {
            event,
            created_at,
            dedup_key,
        }
    }
}

/// Persisted form of an [`Event`]. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMeasurement {
    /// Surrogate identifier assigned by the repository
    pub id: i64,
    pub entity_id: String,
    pub timestamp: NaiveDate,
    pub value: u64,
    pub capacity: u32,
    pub distance: f64,
    pub created_at: DateTime<Utc>,
    pub dedup_key: String,
}

impl StoredMeasurement {
    /// Build the stored row from a new measurement and its assigned id
    pub fn from_new(id: i64, measurement: NewMeasurement) -> Self {
        let NewMeasurement {
            event,
            created_at,
            dedup_key,
        } = measurement;
        Self {
            id,
            entity_id: event.entity_id,
            timestamp: event.timestamp,
            value: event.value,
            capacity: event.capacity,
            distance: event.distance,
            created_at,
            dedup_key,
        }
    }
}

/// One row of a computed forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub entity_id: String,
    pub target_date: NaiveDate,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Instant of the recompute that produced this row
    pub generated_at: DateTime<Utc>,
}

/// Latest cached forecast summary for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub next_date: NaiveDate,
    pub next_point_estimate: f64,
    pub generated_at: DateTime<Utc>,
}
