//! Time-bucket aggregation of raw samples.
//!
//! Samples are grouped by `(floor(timestamp, granularity), entity_key)` and reduced to
//! avg/min/max/sum/sample count per requested metric. The preferred path hands the grouping to a
//! [`BucketStore`]; when the store fails, the same buckets are computed in memory.

mod sqlite;
mod store;


pub use sqlite::SqliteBucketStore;
pub use store::{BucketStore, BucketStoreError};

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::granularity::AggregationGranularity;
use crate::model::{AggregatedBucket, MetricAggregate, QualityTag, TimeSeriesSample};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MAX_RAW_SPAN_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `None` selects a width from the span.
    #[serde(default, deserialize_with = "crate::granularity::deserialize_requested")]
    pub granularity: Option<AggregationGranularity>,
    pub metrics: Vec<String>,
}

impl AggregationRequest {
    pub fn span(&self) -> ChronoDuration {
        self.end - self.start
    }

    pub fn resolved_granularity(&self) -> AggregationGranularity {
        AggregationGranularity::resolve(self.granularity, self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPath {
    Raw,
    Store,
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationOutcome {
    pub granularity: AggregationGranularity,
    pub path: AggregationPath,
    pub buckets: Vec<AggregatedBucket>,
}

#[derive(Debug, Clone)]
pub struct TimeBucketAggregator {
    max_raw_span: ChronoDuration,
}

impl Default for TimeBucketAggregator {
    fn default() -> Self {
        Self::new(ChronoDuration::days(DEFAULT_MAX_RAW_SPAN_DAYS))
    }
}

impl TimeBucketAggregator {
    pub fn new(max_raw_span: ChronoDuration) -> Self {
        Self { max_raw_span }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self::new(config.max_raw_span())
    }

    pub fn max_raw_span(&self) -> ChronoDuration {
        self.max_raw_span
    }

    /// Resolves the granularity and enforces the raw-mode span ceiling before any work happens.
    pub fn plan(&self, request: &AggregationRequest) -> AnalyticsResult<AggregationGranularity> {
        let granularity = request.resolved_granularity();
        if granularity.is_raw() && request.span() > self.max_raw_span {
            return Err(AnalyticsError::range_too_large(
                request.span(),
                self.max_raw_span,
            ));
        }
        Ok(granularity)
    }

    /// In-memory aggregation.
    pub fn aggregate(
        &self,
        samples: &[TimeSeriesSample],
        request: &AggregationRequest,
    ) -> AnalyticsResult<Vec<AggregatedBucket>> {
        let granularity = self.plan(request)?;
        if granularity.is_raw() {
            return Ok(raw_buckets(samples, &request.metrics));
        }
        Ok(aggregate_in_memory(samples, granularity, &request.metrics))
    }

    /// Runs the grouped query on `store`, falling back to the in-memory path if it fails.
    pub fn aggregate_with_store(
        &self,
        store: &dyn BucketStore,
        samples: &[TimeSeriesSample],
        request: &AggregationRequest,
    ) -> AnalyticsResult<AggregationOutcome> {
        let granularity = self.plan(request)?;
        if granularity.is_raw() {
            return Ok(AggregationOutcome {
                granularity,
                path: AggregationPath::Raw,
                buckets: raw_buckets(samples, &request.metrics),
            });
        }

        match store.grouped_buckets(samples, granularity, &request.metrics) {
            Ok(buckets) => {
                tracing::debug!(
                    store = store.name(),
                    granularity = %granularity,
                    samples = samples.len(),
                    buckets = buckets.len(),
                    "grouped bucket query complete"
                );
                Ok(AggregationOutcome {
                    granularity,
                    path: AggregationPath::Store,
                    buckets,
                })
            }
            Err(err) => {
                tracing::warn!(
                    store = store.name(),
                    error = %err,
                    "grouped bucket query failed; aggregating in memory"
                );
                Ok(AggregationOutcome {
                    granularity,
                    path: AggregationPath::InMemory,
                    buckets: aggregate_in_memory(samples, granularity, &request.metrics),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MetricAccumulator {
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl MetricAccumulator {
    fn new(value: f64) -> Self {
        Self {
            sum: value,
            min: value,
            max: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    fn finish(self) -> MetricAggregate {
        MetricAggregate {
            avg: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            sum: self.sum,
            sample_count: self.count,
        }
    }
}

#[derive(Debug, Default)]
struct BucketAccumulator {
    sample_count: u64,
    quality_tag: QualityTag,
    metrics: BTreeMap<String, MetricAccumulator>,
}

/// Groups samples into buckets without touching any backend. Output is ordered by
/// `(bucket_start, entity_key)`; RAW is treated as one bucket per distinct timestamp.
pub fn aggregate_in_memory(
    samples: &[TimeSeriesSample],
    granularity: AggregationGranularity,
    metrics: &[String],
) -> Vec<AggregatedBucket> {
    let mut grouped: BTreeMap<(DateTime<Utc>, String), BucketAccumulator> = BTreeMap::new();

    for sample in samples {
        let key = (granularity.floor(sample.timestamp), sample.entity_key.clone());
        let bucket = grouped.entry(key).or_default();
        bucket.sample_count += 1;
        bucket.quality_tag = bucket.quality_tag.worst(sample.quality_tag);
        for metric in metrics {
            let Some(value) = sample.metric(metric) else {
                continue;
            };
            bucket
                .metrics
                .entry(metric.clone())
                .and_modify(|acc| acc.push(value))
                .or_insert_with(|| MetricAccumulator::new(value));
        }
    }

    grouped
        .into_iter()
        .map(|((bucket_start, entity_key), acc)| AggregatedBucket {
            bucket_start,
            entity_key,
            metrics: acc
                .metrics
                .into_iter()
                .map(|(name, metric)| (name, metric.finish()))
                .collect(),
            sample_count: acc.sample_count,
            quality_tag: acc.quality_tag,
        })
        .collect()
}

/// One bucket per sample, ordered by `(timestamp, entity_key)`.
pub fn raw_buckets(samples: &[TimeSeriesSample], metrics: &[String]) -> Vec<AggregatedBucket> {
    let mut buckets: Vec<AggregatedBucket> = samples
        .iter()
        .map(|sample| AggregatedBucket {
            bucket_start: sample.timestamp,
            entity_key: sample.entity_key.clone(),
            metrics: metrics
                .iter()
                .filter_map(|metric| {
                    sample
                        .metric(metric)
                        .map(|value| (metric.clone(), MetricAccumulator::new(value).finish()))
                })
                .collect(),
            sample_count: 1,
            quality_tag: sample.quality_tag,
        })
        .collect();
    buckets.sort_by(|a, b| {
        (a.bucket_start, &a.entity_key).cmp(&(b.bucket_start, &b.entity_key))
    });
    buckets
}
