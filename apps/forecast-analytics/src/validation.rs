//! Acceptance checks for a forecast series before it is published.

use crate::accuracy;
use crate::model::ForecastPoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationThresholds {
    /// Maximum forecast as a multiple of plant capacity.
    pub max_overpower_ratio: f64,
    pub warning_mape: f64,
    pub failure_mape: f64,
    pub max_negative_values: usize,
    pub max_missing_percentage: f64,
    pub min_points: usize,
    pub min_capacity_factor: f64,
    pub max_capacity_factor: f64,
    /// Largest allowed change between consecutive points, as a fraction of capacity.
    pub max_ramp_ratio: f64,
    /// Length of one forecast interval, used for energy totals.
    pub interval_hours: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_overpower_ratio: 1.0,
            warning_mape: 5.0,
            failure_mape: 10.0,
            max_negative_values: 0,
            max_missing_percentage: 5.0,
            min_points: 24,
            min_capacity_factor: 0.05,
            max_capacity_factor: 0.35,
            max_ramp_ratio: 0.5,
            interval_hours: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetrics {
    pub max_power_kw: Option<f64>,
    pub capacity_utilization: Option<f64>,
    pub mape_percent: Option<f64>,
    pub negative_values: usize,
    pub missing_percentage: f64,
    pub point_count: usize,
    pub capacity_factor: Option<f64>,
    pub max_ramp_rate: Option<f64>,
    pub total_energy_mwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub passed: bool,
    pub critical_failures: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: ValidationMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastValidator {
    pub thresholds: ValidationThresholds,
}

impl ForecastValidator {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn validate(&self, series: &[ForecastPoint], capacity_kw: f64) -> ValidationReport {
        validate(series, capacity_kw, &self.thresholds)
    }
}

pub fn validate(
    series: &[ForecastPoint],
    capacity_kw: f64,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut critical_failures = Vec::new();
    let mut warnings = Vec::new();

    let capacity = (capacity_kw.is_finite() && capacity_kw > 0.0).then_some(capacity_kw);
    if capacity.is_none() {
        critical_failures.push(format!("Invalid plant capacity: {capacity_kw} kW"));
    }

    let mut ordered: Vec<&ForecastPoint> = series.iter().collect();
    ordered.sort_by_key(|point| point.timestamp);
    let values: Vec<f64> = ordered
        .iter()
        .map(|point| point.forecast_value)
        .filter(|value| value.is_finite())
        .collect();

    let max_power = values.iter().copied().reduce(f64::max);
    if let (Some(max_power), Some(capacity)) = (max_power, capacity) {
        let limit = capacity * thresholds.max_overpower_ratio;
        if max_power > limit {
            critical_failures.push(format!(
                "Capacity violation: {max_power:.1} kW > {limit:.1} kW limit"
            ));
        }
    }

    let has_actuals = series.iter().any(|point| point.valid_values().is_some());
    let mape = has_actuals.then(|| {
        let pairs: Vec<_> = series.iter().map(ForecastPoint::as_pair).collect();
        accuracy::calculate(&pairs).mape
    });
    if let Some(mape) = mape {
        if mape > thresholds.failure_mape {
            critical_failures.push(format!(
                "MAPE failure: {mape:.1}% > {:.1}% limit",
                thresholds.failure_mape
            ));
        } else if mape > thresholds.warning_mape {
            warnings.push(format!(
                "MAPE warning: {mape:.1}% > {:.1}% target",
                thresholds.warning_mape
            ));
        }
    }

    let negative_values = values.iter().filter(|value| **value < 0.0).count();
    if negative_values > thresholds.max_negative_values {
        critical_failures.push(format!("Negative values: {negative_values} found"));
    }

    let point_count = series.len();
    let missing = point_count - values.len();
    let missing_percentage = if point_count == 0 {
        0.0
    } else {
        missing as f64 / point_count as f64 * 100.0
    };
    if missing_percentage > thresholds.max_missing_percentage {
        critical_failures.push(format!(
            "Missing data: {missing_percentage:.1}% > {:.1}% limit",
            thresholds.max_missing_percentage
        ));
    }

    if point_count < thresholds.min_points {
        critical_failures.push(format!(
            "Forecast too short: {point_count} points < {} minimum",
            thresholds.min_points
        ));
    }

    let capacity_factor = capacity.and_then(|capacity| {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64 / capacity)
    });
    if let Some(cf) = capacity_factor {
        if cf < thresholds.min_capacity_factor {
            warnings.push(format!("Low capacity factor: {:.1}%", cf * 100.0));
        } else if cf > thresholds.max_capacity_factor {
            warnings.push(format!("High capacity factor: {:.1}%", cf * 100.0));
        }
    }

    let max_ramp_rate = capacity.and_then(|capacity| {
        values
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .reduce(f64::max)
            .map(|ramp| ramp / capacity)
    });
    if let Some(ramp) = max_ramp_rate {
        if ramp > thresholds.max_ramp_ratio {
            warnings.push(format!(
                "High ramp rate: {:.1}% > {:.1}% of capacity",
                ramp * 100.0,
                thresholds.max_ramp_ratio * 100.0
            ));
        }
    }

    let total_energy_mwh = values.iter().sum::<f64>() * thresholds.interval_hours / 1000.0;

    let passed = critical_failures.is_empty();
    if !passed {
        tracing::debug!(
            failures = critical_failures.len(),
            warnings = warnings.len(),
            "forecast failed validation"
        );
    }

    ValidationReport {
        passed,
        critical_failures,
        warnings,
        metrics: ValidationMetrics {
            max_power_kw: max_power,
            capacity_utilization: max_power.zip(capacity).map(|(power, cap)| power / cap),
            mape_percent: mape,
            negative_values,
            missing_percentage,
            point_count,
            capacity_factor,
            max_ramp_rate,
            total_energy_mwh,
        },
    }
}
