//! Data quality scoring for aggregated series.

use crate::model::{round_to, AggregatedBucket, QualityTag};
use serde::{Deserialize, Serialize};

pub const CAPACITY_FACTOR_METRIC: &str = "capacity_factor";
pub const AVAILABILITY_METRIC: &str = "availability";

const MIN_PLAUSIBLE_CAPACITY_FACTOR: f64 = 0.05;
const MAX_PLAUSIBLE_CAPACITY_FACTOR: f64 = 0.9;
const MIN_AVAILABILITY: f64 = 0.8;
const SUSPICIOUS_AVAILABILITY: f64 = 0.999;
const CAPACITY_FACTOR_PENALTY: f64 = 20.0;
const LOW_AVAILABILITY_PENALTY: f64 = 15.0;
const SUSPICIOUS_AVAILABILITY_PENALTY: f64 = 10.0;
const COMPLETENESS_TARGET: f64 = 90.0;

pub const WITHIN_EXPECTED_RANGES: &str = "Data quality metrics are within expected ranges";

/// How completeness and reliability combine into the overall score. Each policy backs a
/// different dashboard surface, so they are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityPolicy {
    /// `0.6 * completeness + 0.4 * reliability`.
    #[default]
    AggregationStatistics,
    /// Simple average of completeness and reliability.
    SingleSeries,
}

impl QualityPolicy {
    pub fn overall(self, completeness: f64, reliability: f64) -> f64 {
        match self {
            Self::AggregationStatistics => 0.6 * completeness + 0.4 * reliability,
            Self::SingleSeries => (completeness + reliability) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Aggregate statistics of the primary metric. Absent values skip their checks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryMetricStats {
    #[serde(default)]
    pub mean_capacity_factor: Option<f64>,
    #[serde(default)]
    pub mean_availability: Option<f64>,
}

impl PrimaryMetricStats {
    /// Count-weighted means of the capacity factor and availability bucket averages.
    pub fn from_buckets(buckets: &[AggregatedBucket]) -> Self {
        Self {
            mean_capacity_factor: weighted_bucket_mean(buckets, CAPACITY_FACTOR_METRIC),
            mean_availability: weighted_bucket_mean(buckets, AVAILABILITY_METRIC),
        }
    }
}

fn weighted_bucket_mean(buckets: &[AggregatedBucket], metric: &str) -> Option<f64> {
    let (sum, count) = buckets
        .iter()
        .filter_map(|bucket| bucket.metrics.get(metric))
        .fold((0.0, 0u64), |(sum, count), agg| (sum + agg.sum, count + agg.sample_count));
    (count > 0).then(|| sum / count as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQualityReport {
    pub completeness: f64,
    pub reliability: f64,
    pub overall_score: f64,
    pub grade: QualityGrade,
    pub policy: QualityPolicy,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataQualityScorer {
    pub policy: QualityPolicy,
}

impl DataQualityScorer {
    pub fn new(policy: QualityPolicy) -> Self {
        Self { policy }
    }

    pub fn score(&self, expected: u64, actual: u64, stats: &PrimaryMetricStats) -> DataQualityReport {
        score(expected, actual, stats, self.policy)
    }
}

pub fn score(
    expected: u64,
    actual: u64,
    stats: &PrimaryMetricStats,
    policy: QualityPolicy,
) -> DataQualityReport {
    let mut recommendations = Vec::new();

    let completeness = if expected == 0 {
        100.0
    } else {
        (actual as f64 / expected as f64 * 100.0).min(100.0)
    };
    if completeness < COMPLETENESS_TARGET {
        recommendations.push(format!(
            "Only {completeness:.1}% of expected samples were received ({actual} of {expected}); check data collection for gaps"
        ));
    }

    let mut reliability: f64 = 100.0;
    if let Some(cf) = stats.mean_capacity_factor.filter(|v| v.is_finite()) {
        if cf < MIN_PLAUSIBLE_CAPACITY_FACTOR {
            reliability -= CAPACITY_FACTOR_PENALTY;
            recommendations.push(format!(
                "Mean capacity factor {cf:.3} is below {MIN_PLAUSIBLE_CAPACITY_FACTOR}; check for curtailment or under-reporting meters"
            ));
        } else if cf > MAX_PLAUSIBLE_CAPACITY_FACTOR {
            reliability -= CAPACITY_FACTOR_PENALTY;
            recommendations.push(format!(
                "Mean capacity factor {cf:.3} is above {MAX_PLAUSIBLE_CAPACITY_FACTOR}; verify the configured plant capacity"
            ));
        }
    }
    if let Some(availability) = stats.mean_availability.filter(|v| v.is_finite()) {
        if availability < MIN_AVAILABILITY {
            reliability -= LOW_AVAILABILITY_PENALTY;
            recommendations.push(format!(
                "Mean availability {:.1}% is below {:.0}%; review outages and inverter faults",
                availability * 100.0,
                MIN_AVAILABILITY * 100.0
            ));
        } else if availability >= SUSPICIOUS_AVAILABILITY {
            reliability -= SUSPICIOUS_AVAILABILITY_PENALTY;
            recommendations.push(format!(
                "Mean availability {:.2}% is suspiciously high; verify availability reporting",
                availability * 100.0
            ));
        }
    }
    let reliability = reliability.max(0.0);

    if recommendations.is_empty() {
        recommendations.push(WITHIN_EXPECTED_RANGES.to_string());
    }

    let overall_score = round_to(policy.overall(completeness, reliability), 2);
    DataQualityReport {
        completeness: round_to(completeness, 2),
        reliability,
        overall_score,
        grade: QualityGrade::from_score(overall_score),
        policy,
        recommendations,
    }
}

/// Quality tag for one bucket given how many samples the slot should have held.
pub fn classify_bucket(bucket: &AggregatedBucket, expected_samples: u64) -> QualityTag {
    if bucket.sample_count == 0 {
        return QualityTag::Missing;
    }
    let ratio = if expected_samples == 0 {
        1.0
    } else {
        bucket.sample_count as f64 / expected_samples as f64
    };
    if ratio >= 0.9 && bucket.quality_tag == QualityTag::Good {
        QualityTag::Good
    } else if ratio >= 0.5 {
        QualityTag::Estimated
    } else {
        QualityTag::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricAggregate;
    use crate::test_support::{assert_close, ts};
    use std::collections::BTreeMap;

    fn bucket(sample_count: u64, metrics: &[(&str, f64, u64)]) -> AggregatedBucket {
        AggregatedBucket {
            bucket_start: ts("2024-06-01T00:00:00Z"),
            entity_key: "site-1".to_string(),
            metrics: metrics
                .iter()
                .map(|(name, avg, count)| {
                    (
                        name.to_string(),
                        MetricAggregate {
                            avg: *avg,
                            min: *avg,
                            max: *avg,
                            sum: avg * *count as f64,
                            sample_count: *count,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            sample_count,
            quality_tag: QualityTag::Good,
        }
    }

    fn healthy() -> PrimaryMetricStats {
        PrimaryMetricStats {
            mean_capacity_factor: Some(0.22),
            mean_availability: Some(0.97),
        }
    }

    #[test]
    fn clean_input_reports_within_expected_ranges() {
        let report = score(96, 96, &healthy(), QualityPolicy::AggregationStatistics);
        assert_eq!(report.completeness, 100.0);
        assert_eq!(report.reliability, 100.0);
        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.grade, QualityGrade::Excellent);
        assert_eq!(report.recommendations, vec![WITHIN_EXPECTED_RANGES.to_string()]);
    }

    #[test]
    fn empty_input_never_yields_empty_recommendations() {
        let report = score(0, 0, &PrimaryMetricStats::default(), QualityPolicy::SingleSeries);
        assert_eq!(report.completeness, 100.0);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0], WITHIN_EXPECTED_RANGES);
    }

    #[test]
    fn completeness_is_capped_at_hundred() {
        let report = score(10, 25, &healthy(), QualityPolicy::AggregationStatistics);
        assert_eq!(report.completeness, 100.0);
    }

    #[test]
    fn deductions_stack_and_policies_differ() {
        let stats = PrimaryMetricStats {
            mean_capacity_factor: Some(0.95),
            mean_availability: Some(0.7),
        };
        let weighted = score(100, 80, &stats, QualityPolicy::AggregationStatistics);
        assert_eq!(weighted.completeness, 80.0);
        assert_eq!(weighted.reliability, 65.0);
        assert_close(weighted.overall_score, 0.6 * 80.0 + 0.4 * 65.0, 1e-9);
        assert_eq!(weighted.grade, QualityGrade::Good);
        assert_eq!(weighted.recommendations.len(), 3);

        let simple = score(100, 80, &stats, QualityPolicy::SingleSeries);
        assert_close(simple.overall_score, 72.5, 1e-9);
        assert_ne!(simple.overall_score, weighted.overall_score);
    }

    #[test]
    fn perfect_availability_is_suspicious() {
        let stats = PrimaryMetricStats {
            mean_capacity_factor: Some(0.02),
            mean_availability: Some(1.0),
        };
        let report = score(10, 10, &stats, QualityPolicy::SingleSeries);
        assert_eq!(report.reliability, 70.0);
        assert!(report.recommendations[1].contains("suspiciously high"));
    }

    #[test]
    fn stats_from_buckets_are_count_weighted() {
        let buckets = vec![
            bucket(4, &[("capacity_factor", 0.2, 3), ("availability", 1.0, 4)]),
            bucket(4, &[("capacity_factor", 0.6, 1), ("power_mw", 3.0, 4)]),
        ];
        let stats = PrimaryMetricStats::from_buckets(&buckets);
        assert_close(stats.mean_capacity_factor.unwrap(), 0.3, 1e-12);
        assert_close(stats.mean_availability.unwrap(), 1.0, 1e-12);
        assert_eq!(PrimaryMetricStats::from_buckets(&[]), PrimaryMetricStats::default());
    }

    #[test]
    fn buckets_are_classified_by_fill_ratio() {
        assert_eq!(classify_bucket(&bucket(4, &[]), 4), QualityTag::Good);
        assert_eq!(classify_bucket(&bucket(3, &[]), 4), QualityTag::Estimated);
        assert_eq!(classify_bucket(&bucket(1, &[]), 4), QualityTag::Poor);

        let mut degraded = bucket(4, &[]);
        degraded.quality_tag = QualityTag::Interpolated;
        assert_eq!(classify_bucket(&degraded, 4), QualityTag::Estimated);
    }
}
