//! Value types shared by the analytics stages.
//!
//! Everything here is a short-lived value built for a single analytics call. Metric values are
//! `Option<f64>`: a missing reading stays missing and is never defaulted to zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTag {
    #[default]
    Good,
    Estimated,
    Interpolated,
    Poor,
    Missing,
}

impl QualityTag {
    /// Severity rank; higher is worse.
    pub fn rank(self) -> i64 {
        match self {
            Self::Good => 0,
            Self::Estimated => 1,
            Self::Interpolated => 2,
            Self::Poor => 3,
            Self::Missing => 4,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=0 => Self::Good,
            1 => Self::Estimated,
            2 => Self::Interpolated,
            3 => Self::Poor,
            _ => Self::Missing,
        }
    }

    pub fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesSample {
    pub timestamp: DateTime<Utc>,
    pub entity_key: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub quality_tag: QualityTag,
}

impl TimeSeriesSample {
    /// Finite value of `metric`, treating null and NaN alike.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        self.metrics
            .get(metric)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggregate {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    /// Non-null contributions to this metric.
    pub sample_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBucket {
    pub bucket_start: DateTime<Utc>,
    pub entity_key: String,
    pub metrics: BTreeMap<String, MetricAggregate>,
    /// Samples in the bucket regardless of which metrics they carried; always at least 1.
    pub sample_count: u64,
    pub quality_tag: QualityTag,
}

impl AggregatedBucket {
    pub fn to_point(&self) -> SeriesPoint {
        SeriesPoint {
            timestamp: self.bucket_start,
            entity_key: self.entity_key.clone(),
            values: self
                .metrics
                .iter()
                .map(|(name, agg)| (name.clone(), agg.avg))
                .collect(),
            quality_tag: self.quality_tag,
        }
    }
}

pub fn series_points(buckets: &[AggregatedBucket]) -> Vec<SeriesPoint> {
    buckets.iter().map(AggregatedBucket::to_point).collect()
}

/// One point of a bucketed series as consumed by the repair stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub entity_key: String,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub quality_tag: QualityTag,
}

impl SeriesPoint {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastObservationPair {
    pub timestamp: DateTime<Utc>,
    pub forecast_value: f64,
    #[serde(default)]
    pub actual_value: Option<f64>,
}

impl ForecastObservationPair {
    /// `(forecast, actual)` when both are finite and the actual is non-zero.
    pub fn valid_values(&self) -> Option<(f64, f64)> {
        valid_pair(self.forecast_value, self.actual_value)
    }
}

pub(crate) fn valid_pair(forecast: f64, actual: Option<f64>) -> Option<(f64, f64)> {
    let actual = actual?;
    if !forecast.is_finite() || !actual.is_finite() || actual == 0.0 {
        return None;
    }
    Some((forecast, actual))
}

/// Forecast row with the optional annotations the statistics analyzer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub forecast_value: f64,
    #[serde(default)]
    pub actual_value: Option<f64>,
    /// Producer-reported confidence on a 0-100 scale.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub model_type: Option<String>,
}

impl ForecastPoint {
    pub fn valid_values(&self) -> Option<(f64, f64)> {
        valid_pair(self.forecast_value, self.actual_value)
    }

    pub fn as_pair(&self) -> ForecastObservationPair {
        ForecastObservationPair {
            timestamp: self.timestamp,
            forecast_value: self.forecast_value,
            actual_value: self.actual_value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyMetrics {
    pub accuracy: f64,
    pub mape: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    pub nrmse: f64,
    pub skill_score: f64,
    pub sample_count: usize,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityDistribution {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub slope: f64,
    pub variance: f64,
    pub seasonality_detected: bool,
}

impl TrendAnalysis {
    pub fn flat() -> Self {
        Self {
            direction: TrendDirection::Stable,
            slope: 0.0,
            variance: 0.0,
            seasonality_detected: false,
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
