//! Forecast engines
//!
//! The pipeline treats forecasting as an opaque, fallible function over an
//! entity's full ordered history. Two baselines ship with the crate; any
//! other model plugs in behind [`ForecastEngine`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::event::{ForecastPoint, StoredMeasurement};

mod moving_average;
mod seasonal_naive;

pub use moving_average::MovingAverageEngine;
pub use seasonal_naive::SeasonalNaiveEngine;

/// Default central prediction-interval width
pub const DEFAULT_INTERVAL_WIDTH: f64 = 0.80;

/// Forecast engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("history is empty")]
    EmptyHistory,

    #[error("model error: {0}")]
    Model(String),
}

/// One observation fed to an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl From<&StoredMeasurement> for HistoryPoint {
    fn from(m: &StoredMeasurement) -> Self {
        Self {
            date: m.timestamp,
            value: m.value as f64,
        }
    }
}

/// One predicted day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedPoint {
    pub target_date: NaiveDate,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Fits a model to a history and predicts the following days
pub trait ForecastEngine: Send + Sync {
    /// `history` is ascending by date and may repeat dates
    fn fit_and_predict(
        &self,
        history: &[HistoryPoint],
        horizon_days: u32,
    ) -> Result<Vec<PredictedPoint>, ForecastError>;

    fn name(&self) -> &str;
}

/// Built-in engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    #[default]
    MovingAverage,
    SeasonalNaive,
}

impl EngineKind {
    pub fn build(self, interval_width: f64) -> Box<dyn ForecastEngine> {
        match self {
            EngineKind::MovingAverage => {
                Box::new(MovingAverageEngine::default().with_interval_width(interval_width))
            }
            EngineKind::SeasonalNaive => {
                Box::new(SeasonalNaiveEngine::default().with_interval_width(interval_width))
            }
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "moving-average" | "moving_average" | "ma" => Ok(EngineKind::MovingAverage),
            "seasonal-naive" | "seasonal_naive" | "snaive" => Ok(EngineKind::SeasonalNaive),
            other => Err(format!(
                "unknown engine '{other}' (expected moving-average or seasonal-naive)"
            )),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::MovingAverage => f.write_str("moving-average"),
            EngineKind::SeasonalNaive => f.write_str("seasonal-naive"),
        }
    }
}

/// For each target date keep only the row with the newest `generated_at`
pub fn latest_generation(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut latest: BTreeMap<NaiveDate, &ForecastPoint> = BTreeMap::new();
    for point in points {
        latest
            .entry(point.target_date)
            .and_modify(|current| {
                if point.generated_at >= current.generated_at {
                    *current = point;
                }
            })
            .or_insert(point);
    }
    latest.into_values().cloned().collect()
}

/// Collapse repeated dates into their mean, ascending by date
pub(crate) fn daily_series(history: &[HistoryPoint]) -> Vec<HistoryPoint> {
    let mut buckets: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();
    for point in history {
        let bucket = buckets.entry(point.date).or_insert((0.0, 0));
        bucket.0 += point.value;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(date, (sum, n))| HistoryPoint {
            date,
            value: sum / f64::from(n),
        })
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, 0 for fewer than two values
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Two-sided normal quantile for a central interval of `width`
/// (Abramowitz & Stegun 26.2.23, |error| < 4.5e-4)
pub(crate) fn z_for_interval(width: f64) -> f64 {
    let width = width.clamp(1e-6, 1.0 - 1e-9);
    let tail = (1.0 - width) / 2.0;
    let t = (-2.0 * tail.ln()).sqrt();
    let numerator = 2.515517 + 0.802853 * t + 0.010328 * t * t;
    let denominator = 1.0 + 1.432788 * t + 0.189269 * t * t + 0.001308 * t * t * t;
    t - numerator / denominator
}

pub(crate) fn validate_interval_width(width: f64) -> Result<(), ForecastError> {
    if width.is_finite() && width > 0.0 && width < 1.0 {
        Ok(())
    } else {
        Err(ForecastError::Model(format!(
            "interval width must be in (0, 1), got {width}"
        )))
    }
}
