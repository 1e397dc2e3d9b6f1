use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use super::{
    daily_series, mean, std_dev, validate_interval_width, z_for_interval, ForecastEngine,
    ForecastError, HistoryPoint, PredictedPoint, DEFAULT_INTERVAL_WIDTH,
};

/// Repeats the value observed one season earlier
///
/// A target date with no observation exactly `k` seasons back falls back
/// to the mean of the last season of data.
#[derive(Debug, Clone)]
pub struct SeasonalNaiveEngine {
    season_length: u32,
    interval_width: f64,
}

impl Default for SeasonalNaiveEngine {
    fn default() -> Self {
        Self {
            season_length: 7,
            interval_width: DEFAULT_INTERVAL_WIDTH,
        }
    }
}

impl SeasonalNaiveEngine {
    pub fn new(season_length: u32) -> Self {
        Self {
            season_length: season_length.max(1),
            ..Self::default()
        }
    }

    pub fn with_interval_width(mut self, width: f64) -> Self {
        self.interval_width = width;
        self
    }

    fn seasonal_differences(&self, by_date: &BTreeMap<NaiveDate, f64>) -> Vec<f64> {
        by_date
            .iter()
            .filter_map(|(date, value)| {
                let prior = date.checked_sub_days(Days::new(u64::from(self.season_length)))?;
                by_date.get(&prior).map(|p| value - p)
            })
            .collect()
    }
}

impl ForecastEngine for SeasonalNaiveEngine {
    fn fit_and_predict(
        &self,
        history: &[HistoryPoint],
        horizon_days: u32,
    ) -> Result<Vec<PredictedPoint>, ForecastError> {
        validate_interval_width(self.interval_width)?;
        let daily = daily_series(history);
        let last = daily.last().ok_or(ForecastError::EmptyHistory)?.date;

        let by_date: BTreeMap<NaiveDate, f64> = daily.iter().map(|p| (p.date, p.value)).collect();
        let recent_start = daily.len().saturating_sub(self.season_length as usize);
        let recent: Vec<f64> = daily[recent_start..].iter().map(|p| p.value).collect();
        let fallback = mean(&recent);

        let diffs = self.seasonal_differences(&by_date);
        let spread = if diffs.len() >= 2 {
            std_dev(&diffs)
        } else {
            std_dev(&recent)
        };
        let z = z_for_interval(self.interval_width);

        (1..=horizon_days)
            .map(|step| {
                let target_date = last
                    .checked_add_days(Days::new(u64::from(step)))
                    .ok_or_else(|| ForecastError::Model("forecast date out of range".to_string()))?;
                let seasons_back = (step - 1) / self.season_length + 1;
                let estimate = target_date
                    .checked_sub_days(Days::new(u64::from(seasons_back * self.season_length)))
                    .and_then(|d| by_date.get(&d).copied())
                    .unwrap_or(fallback);
                let band = z * spread * f64::from(seasons_back).sqrt();
                Ok(PredictedPoint {
                    target_date,
                    point_estimate: estimate,
                    lower_bound: (estimate - band).max(0.0),
                    upper_bound: estimate + band,
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "seasonal-naive"
    }
}
