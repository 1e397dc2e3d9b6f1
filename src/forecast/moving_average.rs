use chrono::Days;

use super::{
    daily_series, mean, std_dev, validate_interval_width, z_for_interval, ForecastEngine,
    ForecastError, HistoryPoint, PredictedPoint, DEFAULT_INTERVAL_WIDTH,
};

/// Flat forecast at the mean of the last `window` daily values
#[derive(Debug, Clone)]
pub struct MovingAverageEngine {
    window: usize,
    interval_width: f64,
}

impl Default for MovingAverageEngine {
    fn default() -> Self {
        Self {
            window: 7,
            interval_width: DEFAULT_INTERVAL_WIDTH,
        }
    }
}

impl MovingAverageEngine {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            ..Self::default()
        }
    }

    pub fn with_interval_width(mut self, width: f64) -> Self {
        self.interval_width = width;
        self
    }
}

impl ForecastEngine for MovingAverageEngine {
    fn fit_and_predict(
        &self,
        history: &[HistoryPoint],
        horizon_days: u32,
    ) -> Result<Vec<PredictedPoint>, ForecastError> {
        validate_interval_width(self.interval_width)?;
        let daily = daily_series(history);
        let last = daily.last().ok_or(ForecastError::EmptyHistory)?;

        let start = daily.len().saturating_sub(self.window);
        let values: Vec<f64> = daily[start..].iter().map(|p| p.value).collect();
        let estimate = mean(&values);
        let band = z_for_interval(self.interval_width) * std_dev(&values);

        (1..=horizon_days)
            .map(|step| {
                let target_date = last
                    .date
                    .checked_add_days(Days::new(u64::from(step)))
                    .ok_or_else(|| ForecastError::Model("forecast date out of range".to_string()))?;
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
        "moving-average"
    }
}
