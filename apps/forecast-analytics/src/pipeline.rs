//! End-to-end analytics run: aggregate, repair, then score forecast accuracy and data quality.

use crate::accuracy::{self, weighted_accuracy_score};
use crate::aggregate::{
    AggregationPath, AggregationRequest, BucketStore, SqliteBucketStore, TimeBucketAggregator,
};
use crate::config::AnalyticsConfig;
use crate::error::AnalyticsResult;
use crate::granularity::AggregationGranularity;
use crate::model::{
    series_points, AccuracyMetrics, ForecastPoint, QualityDistribution, SeriesPoint,
    TimeSeriesSample, TrendAnalysis,
};
use crate::quality::{
    DataQualityReport, DataQualityScorer, PrimaryMetricStats, QualityPolicy,
    AVAILABILITY_METRIC, CAPACITY_FACTOR_METRIC,
};
use crate::repair::{RepairSummary, SeriesRepairProcessor};
use crate::statistics::{quality_distribution, ForecastStatistics, ForecastStatisticsAnalyzer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, deserialize_with = "crate::granularity::deserialize_requested")]
    pub granularity: Option<AggregationGranularity>,
    /// Defaults to the configured forecast metric.
    #[serde(default)]
    pub forecast_metric: Option<String>,
    /// Defaults to the configured primary metric.
    #[serde(default)]
    pub actual_metric: Option<String>,
    #[serde(default)]
    pub with_model_breakdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub granularity: AggregationGranularity,
    pub aggregation_path: AggregationPath,
    pub bucket_count: usize,
    pub repair: RepairSummary,
    pub point_count: usize,
    pub accuracy: Option<AccuracyMetrics>,
    pub weighted_accuracy: Option<f64>,
    pub statistics: ForecastStatistics,
    pub quality_distribution: QualityDistribution,
    /// Trend of the per-timestamp forecast total across entities.
    pub trend: TrendAnalysis,
    pub entity_trends: BTreeMap<String, TrendAnalysis>,
    pub data_quality: DataQualityReport,
}

pub struct AnalyticsPipeline {
    config: AnalyticsConfig,
    aggregator: TimeBucketAggregator,
    repair: SeriesRepairProcessor,
    analyzer: ForecastStatisticsAnalyzer,
    scorer: DataQualityScorer,
    store: Option<Box<dyn BucketStore>>,
}

impl AnalyticsPipeline {
    pub fn new(config: AnalyticsConfig, store: Option<Box<dyn BucketStore>>) -> Self {
        Self {
            aggregator: TimeBucketAggregator::from_config(&config),
            repair: SeriesRepairProcessor::from_config(&config),
            analyzer: ForecastStatisticsAnalyzer::from_config(&config),
            scorer: DataQualityScorer::new(QualityPolicy::AggregationStatistics),
            config,
            store,
        }
    }

    /// Uses an in-memory SQLite store for grouped queries when one can be opened.
    pub fn from_config(config: AnalyticsConfig) -> Self {
        let store = match SqliteBucketStore::in_memory() {
            Ok(store) => Some(Box::new(store) as Box<dyn BucketStore>),
            Err(err) => {
                tracing::warn!(error = %err, "sqlite bucket store unavailable; aggregating in memory");
                None
            }
        };
        Self::new(config, store)
    }

    pub fn run(
        &self,
        samples: &[TimeSeriesSample],
        request: &PipelineRequest,
    ) -> AnalyticsResult<PipelineReport> {
        let forecast_metric = request
            .forecast_metric
            .clone()
            .unwrap_or_else(|| self.config.forecast_metric.clone());
        let actual_metric = request
            .actual_metric
            .clone()
            .unwrap_or_else(|| self.repair.primary_metric.clone());

        let mut metrics = vec![actual_metric.clone(), forecast_metric.clone()];
        for extra in [CAPACITY_FACTOR_METRIC, AVAILABILITY_METRIC] {
            if !metrics.iter().any(|metric| metric == extra) {
                metrics.push(extra.to_string());
            }
        }
        metrics.dedup();

        let aggregation = AggregationRequest {
            start: request.start,
            end: request.end,
            granularity: request.granularity,
            metrics,
        };
        let (granularity, path, buckets) = match self.store.as_deref() {
            Some(store) => {
                let outcome = self.aggregator.aggregate_with_store(store, samples, &aggregation)?;
                (outcome.granularity, outcome.path, outcome.buckets)
            }
            None => {
                let granularity = self.aggregator.plan(&aggregation)?;
                let path = if granularity.is_raw() {
                    AggregationPath::Raw
                } else {
                    AggregationPath::InMemory
                };
                (granularity, path, self.aggregator.aggregate(samples, &aggregation)?)
            }
        };

        let repair = SeriesRepairProcessor {
            primary_metric: actual_metric.clone(),
            ..self.repair.clone()
        };
        let (points, repair_summary) = repair.repair(&series_points(&buckets), granularity);

        let forecasts = forecast_points(&points, &forecast_metric, &actual_metric);
        let has_actuals = points.iter().any(|point| point.value(&actual_metric).is_some());
        let accuracy = has_actuals.then(|| {
            let pairs: Vec<_> = forecasts.iter().map(ForecastPoint::as_pair).collect();
            accuracy::calculate(&pairs)
        });

        let entity_trends: BTreeMap<String, TrendAnalysis> =
            entity_forecasts(&points, &forecast_metric, &actual_metric)
                .into_iter()
                .map(|(entity, series)| (entity.to_string(), self.analyzer.trend_analysis(&series)))
                .collect();

        let entities: BTreeSet<&str> = buckets.iter().map(|b| b.entity_key.as_str()).collect();
        let expected = (granularity.slot_count(request.start, request.end) * entities.len()) as u64;
        let data_quality = self.scorer.score(
            expected,
            buckets.len() as u64,
            &PrimaryMetricStats::from_buckets(&buckets),
        );

        tracing::info!(
            granularity = %granularity,
            buckets = buckets.len(),
            points = points.len(),
            forecasts = forecasts.len(),
            overall_quality = data_quality.overall_score,
            "analytics pipeline complete"
        );

        Ok(PipelineReport {
            granularity,
            aggregation_path: path,
            bucket_count: buckets.len(),
            repair: repair_summary,
            point_count: points.len(),
            weighted_accuracy: accuracy.as_ref().map(weighted_accuracy_score),
            accuracy,
            statistics: self.analyzer.statistics(&forecasts, request.with_model_breakdown),
            quality_distribution: quality_distribution(&forecasts),
            trend: self.analyzer.trend_analysis(&forecast_totals(&points, &forecast_metric)),
            entity_trends,
            data_quality,
        })
    }
}

/// One forecast point per series point carrying the forecast metric.
pub fn forecast_points(
    points: &[SeriesPoint],
    forecast_metric: &str,
    actual_metric: &str,
) -> Vec<ForecastPoint> {
    points
        .iter()
        .filter_map(|point| to_forecast(point, forecast_metric, actual_metric))
        .collect()
}

/// Forecast points split by entity, so index-based trends never interleave sites.
pub fn entity_forecasts<'a>(
    points: &'a [SeriesPoint],
    forecast_metric: &str,
    actual_metric: &str,
) -> BTreeMap<&'a str, Vec<ForecastPoint>> {
    let mut by_entity: BTreeMap<&str, Vec<ForecastPoint>> = BTreeMap::new();
    for point in points {
        if let Some(forecast) = to_forecast(point, forecast_metric, actual_metric) {
            by_entity
                .entry(point.entity_key.as_str())
                .or_default()
                .push(forecast);
        }
    }
    by_entity
}

fn to_forecast(
    point: &SeriesPoint,
    forecast_metric: &str,
    actual_metric: &str,
) -> Option<ForecastPoint> {
    Some(ForecastPoint {
        timestamp: point.timestamp,
        forecast_value: point.value(forecast_metric)?,
        actual_value: point.value(actual_metric),
        confidence: None,
        model_type: None,
    })
}

/// One point per timestamp holding the forecast summed over every entity reporting it.
pub fn forecast_totals(points: &[SeriesPoint], forecast_metric: &str) -> Vec<ForecastPoint> {
    let mut totals: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for point in points {
        if let Some(value) = point.value(forecast_metric) {
            *totals.entry(point.timestamp).or_default() += value;
        }
    }
    totals
        .into_iter()
        .map(|(timestamp, forecast_value)| ForecastPoint {
            timestamp,
            forecast_value,
            actual_value: None,
            confidence: None,
            model_type: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::model::TrendDirection;
    use crate::test_support::{assert_close, sample, ts};
    use chrono::Duration as ChronoDuration;

    /// Two days of hourly readings for one site with hours 10-12 of the first day missing.
    fn two_days() -> Vec<TimeSeriesSample> {
        let start = ts("2024-06-01T00:00:00Z");
        (0..48i64)
            .filter(|hour| !(10..=12).contains(hour))
            .map(|hour| {
                let actual = 10.0 + (hour % 24) as f64;
                sample(
                    start + ChronoDuration::hours(hour),
                    "site-1",
                    &[("power_mw", Some(actual)), ("forecast_mw", Some(actual * 1.05))],
                )
            })
            .collect()
    }

    fn request() -> PipelineRequest {
        PipelineRequest {
            start: ts("2024-06-01T00:00:00Z"),
            end: ts("2024-06-03T00:00:00Z"),
            granularity: Some(AggregationGranularity::Hourly),
            forecast_metric: None,
            actual_metric: None,
            with_model_breakdown: false,
        }
    }

    #[test]
    fn pipeline_repairs_and_scores_a_series() {
        let pipeline = AnalyticsPipeline::from_config(AnalyticsConfig::default());
        let report = pipeline.run(&two_days(), &request()).expect("pipeline");

        assert_eq!(report.granularity, AggregationGranularity::Hourly);
        assert_eq!(report.aggregation_path, AggregationPath::Store);
        assert_eq!(report.bucket_count, 45);
        assert_eq!(report.repair.removed_outliers, 0);
        assert_eq!(report.repair.interpolated_points, 3);
        assert_eq!(report.point_count, 48);

        let accuracy = report.accuracy.expect("actuals present");
        assert_eq!(accuracy.sample_count, 48);
        // Forecasts run 5% above actuals everywhere, including interpolated hours.
        assert_close(accuracy.mape, 5.0, 1e-9);
        assert_close(accuracy.accuracy, 95.0, 1e-9);
        assert!(report.weighted_accuracy.is_some());

        assert_eq!(report.statistics.total_forecasts, 48);
        assert_close(report.quality_distribution.excellent, 100.0, 1e-9);
        assert_close(report.data_quality.completeness, 93.75, 1e-9);
        assert_eq!(report.data_quality.reliability, 100.0);
        assert_close(report.data_quality.overall_score, 96.25, 1e-9);
    }

    #[test]
    fn in_memory_pipeline_matches_store_pipeline() {
        let with_store = AnalyticsPipeline::from_config(AnalyticsConfig::default())
            .run(&two_days(), &request())
            .unwrap();
        let without = AnalyticsPipeline::new(AnalyticsConfig::default(), None)
            .run(&two_days(), &request())
            .unwrap();
        assert_eq!(without.aggregation_path, AggregationPath::InMemory);
        assert_eq!(without.bucket_count, with_store.bucket_count);
        assert_eq!(without.accuracy, with_store.accuracy);
        assert_eq!(without.data_quality, with_store.data_quality);
    }

    #[test]
    fn accuracy_is_absent_without_actuals() {
        let samples: Vec<TimeSeriesSample> = two_days()
            .into_iter()
            .map(|mut s| {
                s.metrics.remove("power_mw");
                s
            })
            .collect();
        let report = AnalyticsPipeline::new(AnalyticsConfig::default(), None)
            .run(&samples, &request())
            .unwrap();
        assert!(report.accuracy.is_none());
        assert!(report.weighted_accuracy.is_none());
        assert_eq!(report.statistics.valid_pairs, 0);
    }

    #[test]
    fn single_site_trend_matches_its_entity_trend() {
        let report = AnalyticsPipeline::from_config(AnalyticsConfig::default())
            .run(&two_days(), &request())
            .unwrap();
        assert_eq!(report.entity_trends.len(), 1);
        assert_eq!(report.trend, report.entity_trends["site-1"]);
    }

    #[test]
    fn sites_are_repaired_and_trended_separately() {
        let start = ts("2024-06-01T00:00:00Z");
        let mut samples = Vec::new();
        for hour in 0..24i64 {
            let at = start + ChronoDuration::hours(hour);
            let up = 10.0 + hour as f64;
            let down = 100.0 - 2.0 * hour as f64;
            samples.push(sample(
                at,
                "site-up",
                &[("power_mw", Some(up)), ("forecast_mw", Some(up))],
            ));
            samples.push(sample(
                at,
                "site-down",
                &[("power_mw", Some(down)), ("forecast_mw", Some(down))],
            ));
        }
        for hour in [0i64, 23] {
            samples.push(sample(
                start + ChronoDuration::hours(hour),
                "big-site",
                &[("power_mw", Some(500.0)), ("forecast_mw", Some(500.0))],
            ));
        }
        let mut req = request();
        req.end = ts("2024-06-02T00:00:00Z");

        let report = AnalyticsPipeline::from_config(AnalyticsConfig::default())
            .run(&samples, &req)
            .unwrap();
        assert_eq!(report.repair.removed_outliers, 0);
        assert_eq!(report.repair.interpolated_points, 0);
        assert_eq!(report.point_count, 50);

        let trends = &report.entity_trends;
        assert_eq!(trends.len(), 3);
        assert_eq!(trends["site-up"].direction, TrendDirection::Increasing);
        assert_close(trends["site-up"].slope, 1.0, 1e-9);
        assert_eq!(trends["site-down"].direction, TrendDirection::Decreasing);
        assert_close(trends["site-down"].slope, -2.0, 1e-9);
        assert_eq!(trends["big-site"], TrendAnalysis::flat());
    }

    #[test]
    fn request_json_accepts_granularity_tokens() {
        let parse = |granularity: &str| {
            serde_json::from_str::<PipelineRequest>(&format!(
                r#"{{"start": "2024-06-01T00:00:00Z", "end": "2024-06-03T00:00:00Z", "granularity": {granularity}}}"#
            ))
        };
        assert_eq!(
            parse(r#""15min""#).unwrap().granularity,
            Some(AggregationGranularity::FifteenMinutes)
        );
        assert_eq!(parse(r#""auto""#).unwrap().granularity, None);
        assert_eq!(parse("null").unwrap().granularity, None);
        let err = parse(r#""bogus""#).unwrap_err();
        assert!(err.to_string().contains("unrecognized aggregation granularity"), "{err}");
    }

    #[test]
    fn raw_over_ceiling_is_rejected() {
        let mut req = request();
        req.granularity = Some(AggregationGranularity::Raw);
        req.end = req.start + ChronoDuration::days(45);
        let err = AnalyticsPipeline::from_config(AnalyticsConfig::default())
            .run(&two_days(), &req)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::RangeTooLarge { .. }));
    }
}
