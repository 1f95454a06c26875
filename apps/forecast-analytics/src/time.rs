use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

pub(crate) fn align_down(ts: DateTime<Utc>, interval_seconds: i64) -> DateTime<Utc> {
    let interval = interval_seconds.max(1);
    let interval_ms = interval * 1000;
    let ts_ms = ts.timestamp_millis();
    let bucket_ms = ts_ms.div_euclid(interval_ms) * interval_ms;
    Utc.timestamp_millis_opt(bucket_ms).single().unwrap_or(ts)
}

pub(crate) fn floor_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    align_down(ts, 86_400)
}

/// ISO weeks start on Monday 00:00 UTC.
pub(crate) fn floor_week(ts: DateTime<Utc>) -> DateTime<Utc> {
    let day = floor_day(ts);
    let offset = i64::from(day.weekday().num_days_from_monday());
    day - ChronoDuration::days(offset)
}

pub(crate) fn floor_month(ts: DateTime<Utc>) -> DateTime<Utc> {
    month_start(ts.year(), ts.month()).unwrap_or_else(|| floor_day(ts))
}

pub(crate) fn add_months(ts: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let start = floor_month(ts);
    let total = start.year() * 12 + start.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    month_start(year, month).unwrap_or(start)
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

pub(crate) fn span_days(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn align_down_handles_pre_epoch_timestamps() {
        let aligned = align_down(ts("1969-12-31T23:59:30Z"), 60);
        assert_eq!(aligned, ts("1969-12-31T23:59:00Z"));
    }

    #[test]
    fn floor_week_lands_on_monday() {
        // 2024-03-14 is a Thursday.
        assert_eq!(
            floor_week(ts("2024-03-14T17:45:00Z")),
            ts("2024-03-11T00:00:00Z")
        );
        assert_eq!(
            floor_week(ts("2024-03-11T00:00:00Z")),
            ts("2024-03-11T00:00:00Z")
        );
    }

    #[test]
    fn add_months_rolls_over_year_end() {
        assert_eq!(
            add_months(ts("2023-11-20T08:00:00Z"), 2),
            ts("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            floor_month(ts("2024-02-29T23:59:59Z")),
            ts("2024-02-01T00:00:00Z")
        );
    }
}
