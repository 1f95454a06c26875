use crate::granularity::AggregationGranularity;
use crate::model::{AggregatedBucket, TimeSeriesSample};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BucketStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    #[error("bucket store returned an invalid row: {0}")]
    InvalidRow(String),
}

/// Backend able to run the grouped bucket query.
///
/// Implementations must return buckets ordered by `(bucket_start, entity_key)` with the same
/// per-metric statistics the in-memory aggregation computes. A failing store is never fatal: the
/// aggregator falls back to [`super::aggregate_in_memory`].
pub trait BucketStore {
    fn name(&self) -> &'static str;

    fn grouped_buckets(
        &self,
        samples: &[TimeSeriesSample],
        granularity: AggregationGranularity,
        metrics: &[String],
    ) -> Result<Vec<AggregatedBucket>, BucketStoreError>;
}
