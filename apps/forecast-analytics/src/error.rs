use chrono::Duration as ChronoDuration;
use thiserror::Error;

/// Errors surfaced by the analytics engine.
///
/// Missing metrics, zero actuals, short series and empty inputs are not errors; those paths
/// degrade to sentinel values instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error(
        "raw resolution is limited to {max_days} days but the requested range spans {requested_days:.2} days"
    )]
    RangeTooLarge { requested_days: f64, max_days: i64 },
    #[error("unrecognized aggregation granularity: {0:?}")]
    InvalidGranularity(String),
}

impl AnalyticsError {
    pub fn range_too_large(requested: ChronoDuration, max: ChronoDuration) -> Self {
        Self::RangeTooLarge {
            requested_days: requested.num_seconds() as f64 / 86_400.0,
            max_days: max.num_days(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::InvalidGranularity(_) => "invalid_granularity",
        }
    }
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_too_large_reports_days() {
        let err = AnalyticsError::range_too_large(
            ChronoDuration::hours(24 * 45),
            ChronoDuration::days(30),
        );
        assert_eq!(err.code(), "range_too_large");
        assert_eq!(
            err.to_string(),
            "raw resolution is limited to 30 days but the requested range spans 45.00 days"
        );
    }
}
