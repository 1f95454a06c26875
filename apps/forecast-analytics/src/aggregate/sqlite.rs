//! Grouped aggregation backed by an in-process SQLite database.
//!
//! Samples are staged into temp tables keyed by their precomputed bucket start, then grouped
//! with `GROUP BY`. Bucket boundaries are computed in Rust so calendar-aligned widths (weekly,
//! monthly) share the exact flooring used by the in-memory path.

use super::store::{BucketStore, BucketStoreError};
use crate::granularity::AggregationGranularity;
use crate::model::{AggregatedBucket, MetricAggregate, QualityTag, TimeSeriesSample};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::Mutex;

const STAGING_SCHEMA: &str = r#"
CREATE TEMP TABLE IF NOT EXISTS staged_samples (
    sample_idx INTEGER PRIMARY KEY,
    entity_key TEXT NOT NULL,
    bucket_ms INTEGER NOT NULL,
    quality_rank INTEGER NOT NULL
);
CREATE TEMP TABLE IF NOT EXISTS staged_values (
    sample_idx INTEGER NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL
);
"#;

const CLEAR_STAGING: &str = "DELETE FROM staged_values; DELETE FROM staged_samples;";

const BUCKET_COUNTS_SQL: &str = r#"
SELECT entity_key, bucket_ms, COUNT(*), MAX(quality_rank)
FROM staged_samples
GROUP BY entity_key, bucket_ms
"#;

const METRIC_STATS_SQL: &str = r#"
SELECT s.entity_key, s.bucket_ms, v.metric,
       AVG(v.value), MIN(v.value), MAX(v.value), SUM(v.value), COUNT(*)
FROM staged_values v
JOIN staged_samples s ON s.sample_idx = v.sample_idx
GROUP BY s.entity_key, s.bucket_ms, v.metric
"#;

pub struct SqliteBucketStore {
    conn: Mutex<Connection>,
}

impl SqliteBucketStore {
    pub fn in_memory() -> Result<Self, BucketStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, BucketStoreError> {
        conn.execute_batch(STAGING_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl BucketStore for SqliteBucketStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn grouped_buckets(
        &self,
        samples: &[TimeSeriesSample],
        granularity: AggregationGranularity,
        metrics: &[String],
    ) -> Result<Vec<AggregatedBucket>, BucketStoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| BucketStoreError::Unavailable("connection lock poisoned".to_string()))?;
        let tx = conn.transaction()?;
        tx.execute_batch(CLEAR_STAGING)?;

        {
            let mut insert_sample = tx.prepare_cached(
                "INSERT INTO staged_samples (sample_idx, entity_key, bucket_ms, quality_rank) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_value = tx.prepare_cached(
                "INSERT INTO staged_values (sample_idx, metric, value) VALUES (?1, ?2, ?3)",
            )?;
            for (idx, sample) in samples.iter().enumerate() {
                let idx = idx as i64;
                let bucket_ms = granularity.floor(sample.timestamp).timestamp_millis();
                insert_sample.execute(params![
                    idx,
                    sample.entity_key,
                    bucket_ms,
                    sample.quality_tag.rank()
                ])?;
                for metric in metrics {
                    if let Some(value) = sample.metric(metric) {
                        insert_value.execute(params![idx, metric, value])?;
                    }
                }
            }
        }

        let mut buckets: BTreeMap<(i64, String), AggregatedBucket> = BTreeMap::new();
        {
            let mut stmt = tx.prepare(BUCKET_COUNTS_SQL)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            for row in rows {
                let (entity_key, bucket_ms, sample_count, quality_rank) = row?;
                let bucket_start = Utc
                    .timestamp_millis_opt(bucket_ms)
                    .single()
                    .ok_or_else(|| {
                        BucketStoreError::InvalidRow(format!("bucket_ms out of range: {bucket_ms}"))
                    })?;
                buckets.insert(
                    (bucket_ms, entity_key.clone()),
                    AggregatedBucket {
                        bucket_start,
                        entity_key,
                        metrics: BTreeMap::new(),
                        sample_count: sample_count.max(0) as u64,
                        quality_tag: QualityTag::from_rank(quality_rank),
                    },
                );
            }
        }

        {
            let mut stmt = tx.prepare(METRIC_STATS_SQL)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    MetricAggregate {
                        avg: row.get(3)?,
                        min: row.get(4)?,
                        max: row.get(5)?,
                        sum: row.get(6)?,
                        sample_count: row.get::<_, i64>(7)?.max(0) as u64,
                    },
                ))
            })?;
            for row in rows {
                let (entity_key, bucket_ms, metric, aggregate) = row?;
                let bucket = buckets
                    .get_mut(&(bucket_ms, entity_key))
                    .ok_or_else(|| {
                        BucketStoreError::InvalidRow(format!(
                            "metric {metric} grouped into an unknown bucket"
                        ))
                    })?;
                bucket.metrics.insert(metric, aggregate);
            }
        }

        tx.execute_batch(CLEAR_STAGING)?;
        tx.commit()?;

        Ok(buckets.into_values().collect())
    }
}
