//! Series repair: per-entity outlier suppression and bounded linear gap filling.

use crate::config::AnalyticsConfig;
use crate::granularity::AggregationGranularity;
use crate::model::{QualityTag, SeriesPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub const DEFAULT_OUTLIER_SIGMA: f64 = 3.0;
pub const DEFAULT_OUTLIER_MIN_POINTS: usize = 10;
pub const DEFAULT_MAX_GAPS_TO_FILL: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRepairProcessor {
    pub primary_metric: String,
    pub outlier_sigma: f64,
    pub outlier_min_points: usize,
    pub max_gaps_to_fill: usize,
}

impl SeriesRepairProcessor {
    pub fn new(primary_metric: impl Into<String>) -> Self {
        Self {
            primary_metric: primary_metric.into(),
            outlier_sigma: DEFAULT_OUTLIER_SIGMA,
            outlier_min_points: DEFAULT_OUTLIER_MIN_POINTS,
            max_gaps_to_fill: DEFAULT_MAX_GAPS_TO_FILL,
        }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self {
            primary_metric: config.primary_metric.clone(),
            outlier_sigma: config.outlier_sigma,
            outlier_min_points: config.outlier_min_points,
            max_gaps_to_fill: config.max_gaps_to_fill,
        }
    }

    pub fn remove_outliers(&self, points: &[SeriesPoint]) -> Vec<SeriesPoint> {
        remove_outliers_with(
            points,
            &self.primary_metric,
            self.outlier_sigma,
            self.outlier_min_points,
        )
    }

    pub fn fill_gaps(
        &self,
        points: &[SeriesPoint],
        granularity: AggregationGranularity,
    ) -> Vec<SeriesPoint> {
        fill_gaps(points, granularity, self.max_gaps_to_fill)
    }

    /// Outlier removal followed by gap filling.
    pub fn repair(
        &self,
        points: &[SeriesPoint],
        granularity: AggregationGranularity,
    ) -> (Vec<SeriesPoint>, RepairSummary) {
        let cleaned = self.remove_outliers(points);
        let removed_outliers = points.len() - cleaned.len();
        let filled = self.fill_gaps(&cleaned, granularity);
        let interpolated_points = filled.len() - cleaned.len();
        tracing::debug!(
            input = points.len(),
            removed_outliers,
            interpolated_points,
            "series repair complete"
        );
        (
            filled,
            RepairSummary {
                removed_outliers,
                interpolated_points,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub removed_outliers: usize,
    pub interpolated_points: usize,
}

/// Drops points whose primary value lies outside their entity's `mean ± 3σ`, with the default
/// guard.
pub fn remove_outliers(points: &[SeriesPoint], primary_metric: &str) -> Vec<SeriesPoint> {
    remove_outliers_with(
        points,
        primary_metric,
        DEFAULT_OUTLIER_SIGMA,
        DEFAULT_OUTLIER_MIN_POINTS,
    )
}

/// Per-entity threshold on the primary metric.
///
/// Each entity gets its own `mean ± sigma·σ` band, so a large site never reads as an outlier
/// against a small one. An entity is skipped while fewer than `min_points` of its points carry
/// a primary value. Points without a primary value and points reading exactly 0 are always kept.
/// The band is re-derived after each pass until nothing else is dropped, so the result is a
/// fixed point; it can drop points that a single pass would keep. Input order is preserved.
pub fn remove_outliers_with(
    points: &[SeriesPoint],
    primary_metric: &str,
    sigma: f64,
    min_points: usize,
) -> Vec<SeriesPoint> {
    let mut by_entity: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, point) in points.iter().enumerate() {
        by_entity
            .entry(point.entity_key.as_str())
            .or_default()
            .push(idx);
    }

    let mut keep = vec![true; points.len()];
    for (entity, indices) in by_entity {
        let removed = drop_entity_outliers(
            points,
            &indices,
            &mut keep,
            primary_metric,
            sigma,
            min_points,
        );
        if removed > 0 {
            tracing::debug!(entity, removed, "dropped outliers");
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, keep)| keep.then(|| point.clone()))
        .collect()
}

fn drop_entity_outliers(
    points: &[SeriesPoint],
    indices: &[usize],
    keep: &mut [bool],
    primary_metric: &str,
    sigma: f64,
    min_points: usize,
) -> usize {
    let mut removed = 0;
    loop {
        let values: Vec<f64> = indices
            .iter()
            .filter(|idx| keep[**idx])
            .filter_map(|idx| points[*idx].value(primary_metric))
            .collect();
        if values.len() < min_points {
            break;
        }
        let mean = values.iter().mean();
        let std_dev = values.iter().population_std_dev();
        if !mean.is_finite() || !std_dev.is_finite() {
            break;
        }
        let band = (mean - sigma * std_dev)..=(mean + sigma * std_dev);

        let mut dropped = 0;
        for &idx in indices {
            if !keep[idx] {
                continue;
            }
            match points[idx].value(primary_metric) {
                Some(value) if value != 0.0 && !band.contains(&value) => {
                    keep[idx] = false;
                    dropped += 1;
                }
                _ => {}
            }
        }
        if dropped == 0 {
            break;
        }
        removed += dropped;
    }
    removed
}

/// Inserts linearly interpolated points into gaps of at most `max_gaps_to_fill` missing
/// intervals, per entity. Output is ordered by `(timestamp, entity_key)`.
pub fn fill_gaps(
    points: &[SeriesPoint],
    granularity: AggregationGranularity,
    max_gaps_to_fill: usize,
) -> Vec<SeriesPoint> {
    let mut by_entity: BTreeMap<&str, Vec<&SeriesPoint>> = BTreeMap::new();
    for point in points {
        by_entity
            .entry(point.entity_key.as_str())
            .or_default()
            .push(point);
    }

    let mut out: Vec<SeriesPoint> = Vec::with_capacity(points.len());
    for (_, mut series) in by_entity {
        series.sort_by_key(|point| point.timestamp);
        for window in series.windows(2) {
            out.extend(interpolate_between(
                window[0],
                window[1],
                granularity,
                max_gaps_to_fill,
            ));
        }
        out.extend(series.into_iter().cloned());
    }

    out.sort_by(|a, b| (a.timestamp, &a.entity_key).cmp(&(b.timestamp, &b.entity_key)));
    out
}

fn missing_slots(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: AggregationGranularity,
    limit: usize,
) -> Option<Vec<DateTime<Utc>>> {
    let mut slots = Vec::new();
    let mut cursor = granularity.next_boundary(from)?;
    while cursor < to {
        if slots.len() == limit {
            return None;
        }
        slots.push(cursor);
        let next = granularity.next_boundary(cursor)?;
        if next <= cursor {
            return None;
        }
        cursor = next;
    }
    Some(slots)
}

fn interpolate_between(
    left: &SeriesPoint,
    right: &SeriesPoint,
    granularity: AggregationGranularity,
    max_gaps_to_fill: usize,
) -> Vec<SeriesPoint> {
    let Some(slots) = missing_slots(left.timestamp, right.timestamp, granularity, max_gaps_to_fill)
    else {
        return Vec::new();
    };
    if slots.is_empty() {
        return Vec::new();
    }

    let shared: Vec<(&String, f64, f64)> = left
        .values
        .iter()
        .filter(|(_, v)| v.is_finite())
        .filter_map(|(name, lv)| {
            right
                .values
                .get(name)
                .copied()
                .filter(|rv| rv.is_finite())
                .map(|rv| (name, *lv, rv))
        })
        .collect();
    if shared.is_empty() {
        return Vec::new();
    }

    let total_ms = (right.timestamp - left.timestamp).num_milliseconds() as f64;
    slots
        .into_iter()
        .map(|at| {
            let fraction = (at - left.timestamp).num_milliseconds() as f64 / total_ms;
            SeriesPoint {
                timestamp: at,
                entity_key: left.entity_key.clone(),
                values: shared
                    .iter()
                    .map(|(name, lv, rv)| ((*name).clone(), lv + (rv - lv) * fraction))
                    .collect(),
                quality_tag: QualityTag::Interpolated,
            }
        })
        .collect()
}
