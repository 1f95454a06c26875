//! Aggregate statistics over a forecast series: per-point accuracy averages, model breakdown,
//! quality distribution, index-based trend and daily seasonality.

use crate::accuracy::point_accuracy;
use crate::config::AnalyticsConfig;
use crate::model::{
    round_to, ForecastPoint, QualityDistribution, TrendAnalysis, TrendDirection,
};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub const DEFAULT_CONFIDENCE: f64 = 85.0;
pub const DEFAULT_STABLE_SLOPE: f64 = 0.01;
pub const DEFAULT_SEASONALITY_MIN_POINTS: usize = 48;
pub const DEFAULT_SEASONALITY_CV_THRESHOLD: f64 = 0.2;
const UNLABELED_MODEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPerformance {
    pub count: usize,
    pub avg_accuracy: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastStatistics {
    /// Points with a finite forecast value.
    pub total_forecasts: usize,
    pub valid_pairs: usize,
    /// Mean of per-point accuracy over valid pairs. Not the MAPE-derived accuracy.
    pub average_accuracy: f64,
    pub average_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_performance: Option<BTreeMap<String, ModelPerformance>>,
    pub time_span_days: f64,
    #[serde(default)]
    pub forecast_actual_correlation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastStatisticsAnalyzer {
    pub default_confidence: f64,
    pub stable_slope: f64,
    pub seasonality_min_points: usize,
    pub seasonality_cv_threshold: f64,
}

impl Default for ForecastStatisticsAnalyzer {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            stable_slope: DEFAULT_STABLE_SLOPE,
            seasonality_min_points: DEFAULT_SEASONALITY_MIN_POINTS,
            seasonality_cv_threshold: DEFAULT_SEASONALITY_CV_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
struct ModelAccumulator {
    count: usize,
    accuracy: RunningMean,
    confidence: RunningMean,
}

impl ForecastStatisticsAnalyzer {
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self {
            default_confidence: config.default_confidence,
            stable_slope: config.trend_stable_slope,
            seasonality_min_points: config.seasonality_min_points,
            seasonality_cv_threshold: config.seasonality_cv_threshold,
        }
    }

    fn point_confidence(&self, point: &ForecastPoint) -> f64 {
        point
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(self.default_confidence)
    }

    pub fn statistics(
        &self,
        series: &[ForecastPoint],
        with_model_breakdown: bool,
    ) -> ForecastStatistics {
        let forecasts: Vec<&ForecastPoint> = series
            .iter()
            .filter(|point| point.forecast_value.is_finite())
            .collect();

        let mut accuracy = RunningMean::default();
        let mut confidence = RunningMean::default();
        let mut forecast_values = Vec::new();
        let mut actual_values = Vec::new();
        let mut models: BTreeMap<String, ModelAccumulator> = BTreeMap::new();

        for point in &forecasts {
            let point_confidence = self.point_confidence(point);
            confidence.push(point_confidence);
            let point_accuracy = point_accuracy(point.forecast_value, point.actual_value);
            if let Some(value) = point_accuracy {
                accuracy.push(value);
            }
            if let Some((forecast, actual)) = point.valid_values() {
                forecast_values.push(forecast);
                actual_values.push(actual);
            }

            if with_model_breakdown {
                let label = point
                    .model_type
                    .as_deref()
                    .map(str::trim)
                    .filter(|label| !label.is_empty())
                    .unwrap_or(UNLABELED_MODEL);
                let model = models.entry(label.to_string()).or_default();
                model.count += 1;
                model.confidence.push(point_confidence);
                if let Some(value) = point_accuracy {
                    model.accuracy.push(value);
                }
            }
        }

        let time_span_days = match (
            Iterator::min(forecasts.iter().map(|p| p.timestamp)),
            Iterator::max(forecasts.iter().map(|p| p.timestamp)),
        ) {
            (Some(first), Some(last)) => round_to(crate::time::span_days(first, last), 2),
            _ => 0.0,
        };

        let model_performance = with_model_breakdown.then(|| {
            models
                .into_iter()
                .map(|(label, acc)| {
                    (
                        label,
                        ModelPerformance {
                            count: acc.count,
                            avg_accuracy: round_to(acc.accuracy.mean(), 2),
                            avg_confidence: round_to(acc.confidence.mean(), 2),
                        },
                    )
                })
                .collect()
        });

        ForecastStatistics {
            total_forecasts: forecasts.len(),
            valid_pairs: accuracy.count,
            average_accuracy: round_to(accuracy.mean(), 2),
            average_confidence: round_to(confidence.mean(), 2),
            model_performance,
            time_span_days,
            forecast_actual_correlation: pearson_correlation(&forecast_values, &actual_values)
                .map(|r| round_to(r, 4)),
        }
    }

    pub fn trend_analysis(&self, series: &[ForecastPoint]) -> TrendAnalysis {
        let mut ordered: Vec<&ForecastPoint> = series
            .iter()
            .filter(|point| point.forecast_value.is_finite())
            .collect();
        if ordered.len() < 3 {
            return TrendAnalysis::flat();
        }
        ordered.sort_by_key(|point| point.timestamp);
        let values: Vec<f64> = ordered.iter().map(|point| point.forecast_value).collect();

        let slope = index_slope(&values);
        let direction = if slope.abs() < self.stable_slope {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        TrendAnalysis {
            direction,
            slope,
            variance: values.iter().population_variance(),
            seasonality_detected: self.daily_seasonality(&ordered),
        }
    }

    /// Coefficient of variation across hour-of-day means.
    fn daily_seasonality(&self, ordered: &[&ForecastPoint]) -> bool {
        if ordered.len() < self.seasonality_min_points {
            return false;
        }
        let mut by_hour: [RunningMean; 24] = Default::default();
        for point in ordered {
            by_hour[point.timestamp.hour() as usize].push(point.forecast_value);
        }
        let hourly_means: Vec<f64> = by_hour
            .iter()
            .filter(|hour| hour.count > 0)
            .map(RunningMean::mean)
            .collect();
        if hourly_means.len() < 2 {
            return false;
        }
        let mean = hourly_means.iter().mean();
        if !mean.is_finite() || mean.abs() <= f64::EPSILON {
            return false;
        }
        let cv = hourly_means.iter().population_std_dev() / mean.abs();
        cv > self.seasonality_cv_threshold
    }
}

/// Statistics with the default confidence fallback.
pub fn statistics(series: &[ForecastPoint], with_model_breakdown: bool) -> ForecastStatistics {
    ForecastStatisticsAnalyzer::default().statistics(series, with_model_breakdown)
}

pub fn trend_analysis(series: &[ForecastPoint]) -> TrendAnalysis {
    ForecastStatisticsAnalyzer::default().trend_analysis(series)
}

/// Buckets valid pairs by per-point accuracy: excellent ≥ 90, good ≥ 70, fair ≥ 50, else poor.
pub fn quality_distribution(series: &[ForecastPoint]) -> QualityDistribution {
    let mut counts = [0usize; 4];
    for point in series {
        let Some(accuracy) = point_accuracy(point.forecast_value, point.actual_value) else {
            continue;
        };
        let slot = if accuracy >= 90.0 {
            0
        } else if accuracy >= 70.0 {
            1
        } else if accuracy >= 50.0 {
            2
        } else {
            3
        };
        counts[slot] += 1;
    }

    let total: usize = counts.iter().sum();
    if total == 0 {
        return QualityDistribution::default();
    }
    let pct = |count: usize| round_to(count as f64 / total as f64 * 100.0, 2);
    QualityDistribution {
        excellent: pct(counts[0]),
        good: pct(counts[1]),
        fair: pct(counts[2]),
        poor: pct(counts[3]),
    }
}

/// Ordinary least-squares slope of `values` against their index.
pub fn index_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (idx, value) in values.iter().enumerate() {
        let dx = idx as f64 - x_mean;
        numerator += dx * (value - y_mean);
        denominator += dx * dx;
    }
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Single-pass Pearson correlation. `None` for fewer than 3 pairs or a constant side.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    let mut n = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_xy = 0.0;
    for (xv, yv) in x.iter().zip(y.iter()) {
        if !xv.is_finite() || !yv.is_finite() {
            continue;
        }
        n += 1.0;
        sum_x += xv;
        sum_y += yv;
        sum_xx += xv * xv;
        sum_yy += yv * yv;
        sum_xy += xv * yv;
    }
    if n < 3.0 {
        return None;
    }
    let denom_x = n * sum_xx - sum_x * sum_x;
    let denom_y = n * sum_yy - sum_y * sum_y;
    if denom_x <= 0.0 || denom_y <= 0.0 {
        return None;
    }
    let r = (n * sum_xy - sum_x * sum_y) / (denom_x * denom_y).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}
