use anyhow::{ensure, Result};
use chrono::Duration as ChronoDuration;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::aggregate::DEFAULT_MAX_RAW_SPAN_DAYS;
use crate::repair::{DEFAULT_MAX_GAPS_TO_FILL, DEFAULT_OUTLIER_MIN_POINTS, DEFAULT_OUTLIER_SIGMA};
use crate::statistics::{
    DEFAULT_CONFIDENCE, DEFAULT_SEASONALITY_CV_THRESHOLD, DEFAULT_SEASONALITY_MIN_POINTS,
    DEFAULT_STABLE_SLOPE,
};

pub const DEFAULT_PRIMARY_METRIC: &str = "power_mw";
pub const DEFAULT_FORECAST_METRIC: &str = "forecast_mw";
/// Largest accepted raw-resolution ceiling (about a century).
pub const MAX_RAW_SPAN_DAYS_LIMIT: i64 = 36_500;

fn setup_config_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    for key in ["ANALYTICS_SETUP_CONFIG_PATH", "FARM_SETUP_CONFIG_PATH"] {
        if let Some(path) = non_empty(lookup(key)) {
            return Some(PathBuf::from(path));
        }
    }
    non_empty(lookup("FARM_SETUP_STATE_DIR")).map(|dir| PathBuf::from(dir).join("config.json"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    analytics_raw_max_span_days: Option<i64>,
    #[serde(default)]
    analytics_max_gaps_to_fill: Option<usize>,
    #[serde(default)]
    analytics_outlier_sigma: Option<f64>,
    #[serde(default)]
    analytics_outlier_min_points: Option<usize>,
    #[serde(default)]
    analytics_trend_stable_slope: Option<f64>,
    #[serde(default)]
    analytics_seasonality_min_points: Option<usize>,
    #[serde(default)]
    analytics_seasonality_cv_threshold: Option<f64>,
    #[serde(default)]
    analytics_default_confidence: Option<f64>,
    #[serde(default)]
    analytics_primary_metric: Option<String>,
    #[serde(default)]
    analytics_forecast_metric: Option<String>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "forecast-analytics failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "forecast-analytics failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticsConfig {
    pub raw_max_span_days: i64,
    pub max_gaps_to_fill: usize,
    pub outlier_sigma: f64,
    pub outlier_min_points: usize,
    pub trend_stable_slope: f64,
    pub seasonality_min_points: usize,
    pub seasonality_cv_threshold: f64,
    pub default_confidence: f64,
    pub primary_metric: String,
    pub forecast_metric: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            raw_max_span_days: DEFAULT_MAX_RAW_SPAN_DAYS,
            max_gaps_to_fill: DEFAULT_MAX_GAPS_TO_FILL,
            outlier_sigma: DEFAULT_OUTLIER_SIGMA,
            outlier_min_points: DEFAULT_OUTLIER_MIN_POINTS,
            trend_stable_slope: DEFAULT_STABLE_SLOPE,
            seasonality_min_points: DEFAULT_SEASONALITY_MIN_POINTS,
            seasonality_cv_threshold: DEFAULT_SEASONALITY_CV_THRESHOLD,
            default_confidence: DEFAULT_CONFIDENCE,
            primary_metric: DEFAULT_PRIMARY_METRIC.to_string(),
            forecast_metric: DEFAULT_FORECAST_METRIC.to_string(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable analytics setting");
            None
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Env values win over the setup file;
    /// the setup file wins over defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let overrides = setup_config_path(&lookup)
            .and_then(|path| load_setup_config_overrides(&path))
            .unwrap_or_default();
        let defaults = Self::default();

        let config = Self {
            raw_max_span_days: parsed(&lookup, "ANALYTICS_RAW_MAX_SPAN_DAYS")
                .or(overrides.analytics_raw_max_span_days)
                .unwrap_or(defaults.raw_max_span_days),
            max_gaps_to_fill: parsed(&lookup, "ANALYTICS_MAX_GAPS_TO_FILL")
                .or(overrides.analytics_max_gaps_to_fill)
                .unwrap_or(defaults.max_gaps_to_fill),
            outlier_sigma: parsed(&lookup, "ANALYTICS_OUTLIER_SIGMA")
                .or(overrides.analytics_outlier_sigma)
                .unwrap_or(defaults.outlier_sigma),
            outlier_min_points: parsed(&lookup, "ANALYTICS_OUTLIER_MIN_POINTS")
                .or(overrides.analytics_outlier_min_points)
                .unwrap_or(defaults.outlier_min_points),
            trend_stable_slope: parsed(&lookup, "ANALYTICS_TREND_STABLE_SLOPE")
                .or(overrides.analytics_trend_stable_slope)
                .unwrap_or(defaults.trend_stable_slope),
            seasonality_min_points: parsed(&lookup, "ANALYTICS_SEASONALITY_MIN_POINTS")
                .or(overrides.analytics_seasonality_min_points)
                .unwrap_or(defaults.seasonality_min_points),
            seasonality_cv_threshold: parsed(&lookup, "ANALYTICS_SEASONALITY_CV_THRESHOLD")
                .or(overrides.analytics_seasonality_cv_threshold)
                .unwrap_or(defaults.seasonality_cv_threshold),
            default_confidence: parsed(&lookup, "ANALYTICS_DEFAULT_CONFIDENCE")
                .or(overrides.analytics_default_confidence)
                .unwrap_or(defaults.default_confidence),
            primary_metric: non_empty(lookup("ANALYTICS_PRIMARY_METRIC"))
                .or_else(|| non_empty(overrides.analytics_primary_metric.clone()))
                .unwrap_or(defaults.primary_metric),
            forecast_metric: non_empty(lookup("ANALYTICS_FORECAST_METRIC"))
                .or_else(|| non_empty(overrides.analytics_forecast_metric.clone()))
                .unwrap_or(defaults.forecast_metric),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_RAW_SPAN_DAYS_LIMIT).contains(&self.raw_max_span_days),
            "ANALYTICS_RAW_MAX_SPAN_DAYS must be within 1-{MAX_RAW_SPAN_DAYS_LIMIT} (got {})",
            self.raw_max_span_days
        );
        ensure!(
            self.outlier_sigma.is_finite() && self.outlier_sigma > 0.0,
            "ANALYTICS_OUTLIER_SIGMA must be a positive number (got {})",
            self.outlier_sigma
        );
        ensure!(
            (0.0..=100.0).contains(&self.default_confidence),
            "ANALYTICS_DEFAULT_CONFIDENCE must be within 0-100 (got {})",
            self.default_confidence
        );
        Ok(())
    }

    pub fn max_raw_span(&self) -> ChronoDuration {
        ChronoDuration::days(self.raw_max_span_days)
    }
}
