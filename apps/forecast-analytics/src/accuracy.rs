//! Forecast accuracy metrics over paired (forecast, actual) observations.
//!
//! This is the single implementation of MAPE/RMSE/MAE/R²/NRMSE/skill for the dashboard. Call
//! sites that historically used a blended score get [`weighted_accuracy_score`] instead of a
//! reinterpretation of `accuracy`.

use crate::model::{round_to, valid_pair, AccuracyMetrics, ForecastObservationPair};

/// Reported when no pair is comparable.
pub const NO_DATA_MAPE: f64 = 100.0;

pub fn calculate(pairs: &[ForecastObservationPair]) -> AccuracyMetrics {
    let valid: Vec<(f64, f64)> = pairs
        .iter()
        .filter_map(ForecastObservationPair::valid_values)
        .collect();
    calculate_valid(&valid, pairs.len())
}

/// Same as [`calculate`] for raw `(forecast, actual)` tuples.
pub fn calculate_values(values: &[(f64, Option<f64>)]) -> AccuracyMetrics {
    let valid: Vec<(f64, f64)> = values
        .iter()
        .filter_map(|(forecast, actual)| valid_pair(*forecast, *actual))
        .collect();
    calculate_valid(&valid, values.len())
}

fn no_comparable_data(input_count: usize) -> AccuracyMetrics {
    AccuracyMetrics {
        accuracy: 0.0,
        mape: NO_DATA_MAPE,
        rmse: 0.0,
        mae: 0.0,
        r2: 0.0,
        nrmse: 0.0,
        skill_score: 0.0,
        sample_count: input_count,
        confidence_score: 0.0,
    }
}

fn calculate_valid(valid: &[(f64, f64)], input_count: usize) -> AccuracyMetrics {
    if valid.is_empty() {
        return no_comparable_data(input_count);
    }

    let n = valid.len() as f64;
    let mut abs_pct_sum = 0.0;
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut actual_sum = 0.0;
    let mut actual_min = f64::INFINITY;
    let mut actual_max = f64::NEG_INFINITY;
    for (forecast, actual) in valid {
        let err = actual - forecast;
        abs_pct_sum += err.abs() / actual.abs();
        abs_sum += err.abs();
        sq_sum += err * err;
        actual_sum += actual;
        actual_min = actual_min.min(*actual);
        actual_max = actual_max.max(*actual);
    }

    let mape = abs_pct_sum / n * 100.0;
    let mse = sq_sum / n;
    let rmse = mse.sqrt();
    let mae = abs_sum / n;

    let actual_mean = actual_sum / n;
    let ss_tot: f64 = valid
        .iter()
        .map(|(_, actual)| (actual - actual_mean).powi(2))
        .sum();
    let r2 = if ss_tot > 0.0 {
        (1.0 - sq_sum / ss_tot).max(0.0)
    } else {
        0.0
    };

    let range = actual_max - actual_min;
    let nrmse = if range > 0.0 { rmse / range } else { 0.0 };

    let skill_score = skill_score(valid, mse);

    let accuracy = (100.0 - mape).clamp(0.0, 100.0);
    let volume = (n / 100.0).min(1.0);
    let confidence_score = (0.5 * (accuracy / 100.0) + 0.3 * r2 + 0.2 * volume).clamp(0.0, 1.0);

    AccuracyMetrics {
        accuracy: round_to(accuracy, 2),
        mape: round_to(mape, 2),
        rmse: round_to(rmse, 2),
        mae: round_to(mae, 2),
        r2: round_to(r2, 4),
        nrmse: round_to(nrmse, 4),
        skill_score: round_to(skill_score, 4),
        sample_count: valid.len(),
        confidence_score: round_to(confidence_score, 4),
    }
}

/// Skill against a persistence baseline that repeats the previous actual.
fn skill_score(valid: &[(f64, f64)], forecast_mse: f64) -> f64 {
    let mut persistence_sq = 0.0;
    let mut previous = valid[0].1;
    for (_, actual) in valid {
        persistence_sq += (actual - previous).powi(2);
        previous = *actual;
    }
    let persistence_mse = persistence_sq / valid.len() as f64;
    if persistence_mse > 0.0 {
        (1.0 - forecast_mse / persistence_mse).max(0.0)
    } else {
        0.0
    }
}

/// Accuracy of one pair: `max(0, 100 − |a − f| / |a| · 100)`.
pub fn point_accuracy(forecast: f64, actual: Option<f64>) -> Option<f64> {
    let (forecast, actual) = valid_pair(forecast, actual)?;
    Some((100.0 - percentage_error(forecast, actual)).max(0.0))
}

pub(crate) fn percentage_error(forecast: f64, actual: f64) -> f64 {
    (actual - forecast).abs() / actual.abs() * 100.0
}

/// Blended 0-100 score: `0.4·accuracy + 0.3·(100·R²) + 0.3·(100·skill)`.
///
/// Kept separate from [`AccuracyMetrics::accuracy`] so both published numbers stay stable.
pub fn weighted_accuracy_score(metrics: &AccuracyMetrics) -> f64 {
    let blended =
        0.4 * metrics.accuracy + 0.3 * (metrics.r2 * 100.0) + 0.3 * (metrics.skill_score * 100.0);
    round_to(blended.clamp(0.0, 100.0), 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_close, ts};
    use chrono::Duration as ChronoDuration;

    fn pairs(values: &[(f64, Option<f64>)]) -> Vec<ForecastObservationPair> {
        let start = ts("2024-06-01T00:00:00Z");
        values
            .iter()
            .enumerate()
            .map(|(idx, (forecast, actual))| ForecastObservationPair {
                timestamp: start + ChronoDuration::hours(idx as i64),
                forecast_value: *forecast,
                actual_value: *actual,
            })
            .collect()
    }

    #[test]
    fn worked_example_matches_hand_computation() {
        let metrics = calculate(&pairs(&[
            (10.0, Some(12.0)),
            (20.0, Some(18.0)),
            (30.0, Some(30.0)),
        ]));
        assert_eq!(metrics.sample_count, 3);
        assert_close(metrics.mae, 1.33, 1e-9);
        assert_close(metrics.mape, 9.26, 1e-9);
        assert_close(metrics.accuracy, 90.74, 1e-9);
        assert_close(metrics.rmse, 1.63, 1e-9);
        // SS_res = 8, SS_tot = 168
        assert_close(metrics.r2, 0.9524, 1e-9);
        assert_close(metrics.nrmse, 0.0907, 1e-9);
    }

    #[test]
    fn perfect_forecast_scores_full_accuracy() {
        let values: Vec<(f64, Option<f64>)> =
            [3.0, 7.5, 12.0, 4.25].iter().map(|v| (*v, Some(*v))).collect();
        let metrics = calculate(&pairs(&values));
        assert_eq!(metrics.mape, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.accuracy, 100.0);
        assert_eq!(metrics.r2, 1.0);
        assert!(!metrics.r2.is_nan());
    }

    #[test]
    fn perfect_flat_forecast_has_zero_r2_not_nan() {
        let values: Vec<(f64, Option<f64>)> = vec![(5.0, Some(5.0)); 8];
        let metrics = calculate(&pairs(&values));
        assert_eq!(metrics.r2, 0.0);
        assert_eq!(metrics.nrmse, 0.0);
        assert_eq!(metrics.skill_score, 0.0);
        assert_eq!(metrics.accuracy, 100.0);
    }

    #[test]
    fn flat_actuals_with_varying_forecasts_have_zero_r2() {
        let values: Vec<(f64, Option<f64>)> = (0..20)
            .map(|i| (40.0 + (i % 4) as f64 * 3.0, Some(42.0)))
            .collect();
        let metrics = calculate(&pairs(&values));
        assert_eq!(metrics.r2, 0.0);
        assert!(metrics.r2.is_finite());
        assert!(metrics.mape > 0.0);
    }

    #[test]
    fn empty_input_reports_no_comparable_data() {
        let metrics = calculate(&[]);
        assert_eq!(metrics.mape, 100.0);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.sample_count, 0);
        assert_eq!(metrics.confidence_score, 0.0);
    }

    #[test]
    fn invalid_pairs_keep_input_count() {
        let metrics = calculate(&pairs(&[
            (10.0, Some(0.0)),
            (11.0, None),
            (f64::NAN, Some(4.0)),
        ]));
        assert_eq!(metrics.mape, 100.0);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.sample_count, 3);
    }

    #[test]
    fn zero_actuals_are_filtered_before_scoring() {
        let metrics = calculate_values(&[(10.0, Some(0.0)), (10.0, Some(10.0))]);
        assert_eq!(metrics.sample_count, 1);
        assert_eq!(metrics.mape, 0.0);
    }

    #[test]
    fn skill_score_beats_persistence_on_a_ramp() {
        // Actuals ramp by 10 each step; the forecast tracks within 1.
        let values: Vec<(f64, Option<f64>)> = (0..10)
            .map(|i| (10.0 * i as f64 + 11.0, Some(10.0 * i as f64 + 10.0)))
            .collect();
        let metrics = calculate(&pairs(&values));
        // MSE_forecast = 1, MSE_persistence = 9 * 100 / 10 = 90.
        assert_close(metrics.skill_score, 0.9889, 1e-9);
    }

    #[test]
    fn confidence_blends_accuracy_r2_and_volume() {
        let values: Vec<(f64, Option<f64>)> =
            (1..=50).map(|i| (i as f64, Some(i as f64))).collect();
        let metrics = calculate(&pairs(&values));
        // 0.5 * 1.0 + 0.3 * 1.0 + 0.2 * 0.5
        assert_close(metrics.confidence_score, 0.9, 1e-9);
    }

    #[test]
    fn point_accuracy_clamps_at_zero() {
        assert_eq!(point_accuracy(30.0, Some(10.0)), Some(0.0));
        assert_eq!(point_accuracy(9.0, Some(10.0)), Some(90.0));
        assert_eq!(point_accuracy(9.0, Some(0.0)), None);
    }

    #[test]
    fn weighted_score_is_a_separate_policy() {
        let metrics = calculate(&pairs(&[
            (10.0, Some(12.0)),
            (20.0, Some(18.0)),
            (30.0, Some(30.0)),
        ]));
        let weighted = weighted_accuracy_score(&metrics);
        let expected = 0.4 * 90.74 + 0.3 * 95.24 + 0.3 * (metrics.skill_score * 100.0);
        assert_close(weighted, round_to(expected, 2), 1e-9);
        assert_close(metrics.accuracy, 90.74, 1e-9);
    }
}
