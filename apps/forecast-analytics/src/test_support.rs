use crate::model::{ForecastPoint, QualityTag, SeriesPoint, TimeSeriesSample};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("rfc3339 timestamp")
        .with_timezone(&Utc)
}

pub fn sample(
    at: DateTime<Utc>,
    entity: &str,
    metrics: &[(&str, Option<f64>)],
) -> TimeSeriesSample {
    TimeSeriesSample {
        timestamp: at,
        entity_key: entity.to_string(),
        metrics: metrics
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
        quality_tag: QualityTag::Good,
    }
}

pub fn point(at: DateTime<Utc>, entity: &str, metrics: &[(&str, f64)]) -> SeriesPoint {
    SeriesPoint {
        timestamp: at,
        entity_key: entity.to_string(),
        values: metrics
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect::<BTreeMap<_, _>>(),
        quality_tag: QualityTag::Good,
    }
}

/// Hourly points for a single entity with the primary metric `power_mw`.
pub fn hourly_power_series(start: DateTime<Utc>, values: &[f64]) -> Vec<SeriesPoint> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            point(
                start + ChronoDuration::hours(idx as i64),
                "site-1",
                &[("power_mw", *value)],
            )
        })
        .collect()
}

pub fn forecast_point(
    at: DateTime<Utc>,
    forecast: f64,
    actual: Option<f64>,
) -> ForecastPoint {
    ForecastPoint {
        timestamp: at,
        forecast_value: forecast,
        actual_value: actual,
        confidence: None,
        model_type: None,
    }
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} +/- {tolerance}, got {actual}"
    );
}
