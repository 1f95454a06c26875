//! Bucket widths for aggregated series and the auto-selection policy used when a caller does
//! not request one.

use crate::error::AnalyticsError;
use crate::time::{add_months, align_down, floor_day, floor_month, floor_week};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serialized as its request token (`"15min"`, `"hourly"`, ...) and parsed with the same
/// aliases as [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum AggregationGranularity {
    Raw,
    FifteenMinutes,
    ThirtyMinutes,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl AggregationGranularity {
    pub const ALL: [AggregationGranularity; 7] = [
        Self::Raw,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
    ];

    /// Picks a width so dashboards get a roughly constant bucket count regardless of window.
    pub fn auto_for_span(span: ChronoDuration) -> Self {
        if span <= ChronoDuration::days(7) {
            Self::FifteenMinutes
        } else if span <= ChronoDuration::days(30) {
            Self::Hourly
        } else if span <= ChronoDuration::days(365) {
            Self::Daily
        } else {
            Self::Weekly
        }
    }

    /// Resolves an optional request; `None` means auto.
    pub fn resolve(requested: Option<Self>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        requested.unwrap_or_else(|| Self::auto_for_span(end - start))
    }

    /// Fixed width in seconds. Monthly buckets are calendar months and RAW has no width.
    pub fn fixed_width_seconds(self) -> Option<i64> {
        match self {
            Self::Raw | Self::Monthly => None,
            Self::FifteenMinutes => Some(15 * 60),
            Self::ThirtyMinutes => Some(30 * 60),
            Self::Hourly => Some(3_600),
            Self::Daily => Some(86_400),
            Self::Weekly => Some(7 * 86_400),
        }
    }

    pub fn is_raw(self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Start of the bucket holding `ts`. RAW keeps the timestamp as-is.
    pub fn floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Raw => ts,
            Self::FifteenMinutes | Self::ThirtyMinutes | Self::Hourly => {
                align_down(ts, self.fixed_width_seconds().unwrap_or(1))
            }
            Self::Daily => floor_day(ts),
            Self::Weekly => floor_week(ts),
            Self::Monthly => floor_month(ts),
        }
    }

    /// Start of the bucket following the one that holds `ts`. `None` for RAW.
    pub fn next_boundary(self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Raw => None,
            Self::Monthly => Some(add_months(ts, 1)),
            other => {
                let width = other.fixed_width_seconds()?;
                Some(other.floor(ts) + ChronoDuration::seconds(width))
            }
        }
    }

    /// Number of bucket slots whose start lies in `[start, end)`.
    pub fn slot_count(self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        if end <= start || self.is_raw() {
            return 0;
        }
        if let Some(width) = self.fixed_width_seconds() {
            let first = self.floor(start);
            let span = (end - first).num_seconds();
            return (span + width - 1).div_euclid(width).max(0) as usize;
        }
        let mut count = 0usize;
        let mut cursor = self.floor(start);
        while cursor < end {
            count += 1;
            match self.next_boundary(cursor) {
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }
        count
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for AggregationGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationGranularity {
    type Err = AnalyticsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let parsed = match token.as_str() {
            "raw" => Self::Raw,
            "15min" | "15m" | "15_min" | "fifteen_minutes" | "minute_15" => Self::FifteenMinutes,
            "30min" | "30m" | "30_min" | "thirty_minutes" | "minute_30" => Self::ThirtyMinutes,
            "hourly" | "hour" | "1h" => Self::Hourly,
            "daily" | "day" | "1d" => Self::Daily,
            "weekly" | "week" | "1w" => Self::Weekly,
            "monthly" | "month" => Self::Monthly,
            _ => return Err(AnalyticsError::InvalidGranularity(raw.to_string())),
        };
        Ok(parsed)
    }
}

impl From<AggregationGranularity> for &'static str {
    fn from(granularity: AggregationGranularity) -> Self {
        granularity.as_str()
    }
}

impl TryFrom<String> for AggregationGranularity {
    type Error = AnalyticsError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

/// Parses a request token where `auto` (or an empty value) leaves the choice to
/// [`AggregationGranularity::auto_for_span`].
pub fn parse_requested(raw: Option<&str>) -> Result<Option<AggregationGranularity>, AnalyticsError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(token) if token.eq_ignore_ascii_case("auto") => Ok(None),
        Some(token) => token.parse().map(Some),
    }
}

/// Serde helper for optional request fields: `null`, `""` and `"auto"` all mean auto.
pub fn deserialize_requested<'de, D>(
    deserializer: D,
) -> Result<Option<AggregationGranularity>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = Option::<String>::deserialize(deserializer)?;
    parse_requested(raw.as_deref()).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;

    #[test]
    fn auto_selection_follows_span_thresholds() {
        let g = AggregationGranularity::auto_for_span;
        assert_eq!(g(ChronoDuration::days(7)), AggregationGranularity::FifteenMinutes);
        assert_eq!(g(ChronoDuration::days(8)), AggregationGranularity::Hourly);
        assert_eq!(g(ChronoDuration::days(30)), AggregationGranularity::Hourly);
        assert_eq!(g(ChronoDuration::days(200)), AggregationGranularity::Daily);
        assert_eq!(g(ChronoDuration::days(366)), AggregationGranularity::Weekly);
    }

    #[test]
    fn parses_known_tokens_and_rejects_unknown() {
        assert_eq!(
            "HOURLY".parse::<AggregationGranularity>().unwrap(),
            AggregationGranularity::Hourly
        );
        assert_eq!(
            "fifteen-minutes".parse::<AggregationGranularity>().unwrap(),
            AggregationGranularity::FifteenMinutes
        );
        let err = "fortnightly".parse::<AggregationGranularity>().unwrap_err();
        assert_eq!(err, AnalyticsError::InvalidGranularity("fortnightly".to_string()));
        assert_eq!(parse_requested(Some("auto")).unwrap(), None);
        assert_eq!(parse_requested(None).unwrap(), None);
    }

    #[test]
    fn every_granularity_round_trips_through_its_token() {
        for granularity in AggregationGranularity::ALL {
            assert_eq!(
                granularity.as_str().parse::<AggregationGranularity>().unwrap(),
                granularity
            );
        }
    }

    #[test]
    fn json_uses_request_tokens() {
        let json = serde_json::to_string(&AggregationGranularity::FifteenMinutes).unwrap();
        assert_eq!(json, r#""15min""#);
        let parsed: AggregationGranularity = serde_json::from_str(r#""Hourly""#).unwrap();
        assert_eq!(parsed, AggregationGranularity::Hourly);
        let err = serde_json::from_str::<AggregationGranularity>(r#""fortnightly""#).unwrap_err();
        assert!(err.to_string().contains("unrecognized aggregation granularity"), "{err}");
    }

    #[test]
    fn floor_and_next_boundary_agree() {
        let t = ts("2024-05-17T10:37:12Z");
        let q = AggregationGranularity::FifteenMinutes;
        assert_eq!(q.floor(t), ts("2024-05-17T10:30:00Z"));
        assert_eq!(q.next_boundary(t), Some(ts("2024-05-17T10:45:00Z")));
        let m = AggregationGranularity::Monthly;
        assert_eq!(m.floor(t), ts("2024-05-01T00:00:00Z"));
        assert_eq!(m.next_boundary(t), Some(ts("2024-06-01T00:00:00Z")));
        assert_eq!(AggregationGranularity::Raw.next_boundary(t), None);
    }

    #[test]
    fn slot_count_covers_partial_buckets() {
        let start = ts("2024-01-01T00:00:00Z");
        assert_eq!(
            AggregationGranularity::Hourly.slot_count(start, ts("2024-01-02T00:00:00Z")),
            24
        );
        assert_eq!(
            AggregationGranularity::Hourly.slot_count(start, ts("2024-01-01T02:30:00Z")),
            3
        );
        assert_eq!(
            AggregationGranularity::Monthly.slot_count(start, ts("2024-04-15T00:00:00Z")),
            4
        );
        assert_eq!(AggregationGranularity::Raw.slot_count(start, ts("2024-02-01T00:00:00Z")), 0);
    }
}
