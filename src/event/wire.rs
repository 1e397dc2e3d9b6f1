//! Flat key/value wire format
//!
//! Producers append string-to-string records. Missing numeric attributes
//! fall back to documented defaults and a missing or unparsable date falls
//! back to "today"; only a missing entity or a present-but-invalid number
//! makes a record malformed.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use super::{Event, DEFAULT_CAPACITY, DEFAULT_DISTANCE};

pub const FIELD_DATE: &str = "ds";
pub const FIELD_VALUE: &str = "y";
pub const FIELD_ENTITY: &str = "entity_id";
pub const FIELD_CAPACITY: &str = "capacity";
pub const FIELD_DISTANCE: &str = "distance";

const ALIAS_ENTITY: &str = "nama_faskes";
const ALIAS_CAPACITY: &str = "kapasitas";
const ALIAS_DISTANCE: &str = "jarak";

/// Reasons a wire record cannot become an [`Event`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("record has no entity identifier (expected `entity_id` or `nama_faskes`)")]
    MissingEntity,

    #[error("field `{field}` has invalid value {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Event {
    /// Parse a stream record, using `today` when the date is absent or unreadable
    pub fn from_fields(fields: &HashMap<String, String>, today: NaiveDate) -> Result<Self, WireError> {
        let entity_id = lookup(fields, FIELD_ENTITY, Some(ALIAS_ENTITY))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WireError::MissingEntity)?
            .to_string();

        let timestamp = lookup(fields, FIELD_DATE, None)
            .and_then(parse_date)
            .unwrap_or(today);

        let value = match lookup(fields, FIELD_VALUE, None).map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<u64>().map_err(|_| WireError::InvalidField {
                field: FIELD_VALUE,
                value: raw.to_string(),
                reason: "expected a non-negative integer",
            })?,
        };

        let capacity = match lookup(fields, FIELD_CAPACITY, Some(ALIAS_CAPACITY)).map(str::trim) {
            None | Some("") => DEFAULT_CAPACITY,
            Some(raw) => match raw.parse::<u32>() {
                Ok(c) if c > 0 => c,
                _ => {
                    return Err(WireError::InvalidField {
                        field: FIELD_CAPACITY,
                        value: raw.to_string(),
                        reason: "expected a positive integer",
                    })
                }
            },
        };

        let distance = match lookup(fields, FIELD_DISTANCE, Some(ALIAS_DISTANCE)).map(str::trim) {
            None | Some("") => DEFAULT_DISTANCE,
            Some(raw) => match raw.parse::<f64>() {
                Ok(d) if d.is_finite() && d >= 0.0 => d,
                _ => {
                    return Err(WireError::InvalidField {
                        field: FIELD_DISTANCE,
                        value: raw.to_string(),
                        reason: "expected a finite non-negative number",
                    })
                }
            },
        };

        Ok(Event {
            entity_id,
            timestamp,
            value,
            capacity,
            distance,
        })
    }

    /// Render the event with canonical keys
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_DATE, self.timestamp.to_string()),
            (FIELD_VALUE, self.value.to_string()),
            (FIELD_ENTITY, self.entity_id.clone()),
            (FIELD_CAPACITY, self.capacity.to_string()),
            (FIELD_DISTANCE, self.distance.to_string()),
        ]
    }
}

fn lookup<'a>(
    fields: &'a HashMap<String, String>,
    key: &str,
    alias: Option<&str>,
) -> Option<&'a str> {
    let present = |k: &str| {
        fields
            .get(k)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    };
    // A blank canonical value does not hide a filled alias
    present(key).or_else(|| alias.and_then(present))
}

/// Accepts a plain ISO date or an ISO datetime, keeping only the date part
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}
