//! Time buckets for windowed metrics
//!
//! A bucket is labelled by its closing boundary: every instant in
//! `[k * width, (k + 1) * width)` maps to the label of `(k + 1) * width`.

use chrono::{DateTime, Datelike, Utc};
use mailsift_common::types::MetricUnit;
use std::time::Duration;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Days from 1970-01-01 (a Thursday) back to the preceding Monday
const MONDAY_OFFSET: i64 = 3;

/// Label of the bucket containing `t`
pub fn bucket_label(t: DateTime<Utc>, unit: MetricUnit, interval: i32) -> String {
    let n = i64::from(interval.max(1));

    match unit {
        MetricUnit::Minute => format_epoch(ceil_bucket(t.timestamp(), MINUTE * n), "%Y%m%d%H%M"),
        MetricUnit::Hour => format_epoch(ceil_bucket(t.timestamp(), HOUR * n), "%Y%m%d%H"),
        MetricUnit::Day => format_epoch(ceil_bucket(t.timestamp(), DAY * n), "%Y%m%d"),
        MetricUnit::Week => {
            let weeks = (t.timestamp().div_euclid(DAY) + MONDAY_OFFSET).div_euclid(7);
            let label_week = ceil_bucket(weeks, n);
            let monday = label_week * 7 - MONDAY_OFFSET;
            format_epoch(monday * DAY, "%G%V")
        }
        MetricUnit::Month => {
            let months = i64::from(t.year()) * 12 + i64::from(t.month0());
            let label = ceil_bucket(months, n);
            format!("{:04}{:02}", label.div_euclid(12), label.rem_euclid(12) + 1)
        }
        MetricUnit::Year => format!("{:04}", ceil_bucket(i64::from(t.year()), n)),
    }
}

/// Lifetime of a bucket's counters
pub fn window(unit: MetricUnit, interval: i32) -> Duration {
    let n = u64::from(interval.max(1).unsigned_abs());
    let unit_secs: u64 = match unit {
        MetricUnit::Minute => 60,
        MetricUnit::Hour => 3_600,
        MetricUnit::Day => 86_400,
        MetricUnit::Week => 7 * 86_400,
        MetricUnit::Month => 30 * 86_400,
        MetricUnit::Year => 365 * 86_400,
    };
    Duration::from_secs(unit_secs * n)
}

fn ceil_bucket(value: i64, width: i64) -> i64 {
    value.div_euclid(width) * width + width
}

fn format_epoch(secs: i64, pattern: &str) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(t) => t.format(pattern).to_string(),
        None => secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_minute_buckets_close_forward() {
        let label = |t| bucket_label(t, MetricUnit::Minute, 10);
        assert_eq!(label(at(2024, 5, 6, 9, 7, 0)), "202405060910");
        assert_eq!(label(at(2024, 5, 6, 9, 9, 59)), "202405060910");
        assert_eq!(label(at(2024, 5, 6, 9, 0, 0)), "202405060910");
        assert_eq!(label(at(2024, 5, 6, 9, 10, 0)), "202405060920");
        assert_eq!(label(at(2024, 5, 6, 23, 55, 0)), "202405070000");
    }

    #[test]
    fn test_hour_and_day_buckets() {
        assert_eq!(
            bucket_label(at(2024, 5, 6, 9, 30, 0), MetricUnit::Hour, 1),
            "2024050610"
        );
        assert_eq!(
            bucket_label(at(2024, 5, 6, 9, 30, 0), MetricUnit::Hour, 6),
            "2024050612"
        );
        assert_eq!(
            bucket_label(at(2024, 5, 6, 9, 30, 0), MetricUnit::Day, 1),
            "20240507"
        );
    }

    #[test]
    fn test_week_buckets_start_on_monday() {
        // 2024-05-06 is a Monday, so the whole week shares the next Monday's label
        let monday = bucket_label(at(2024, 5, 6, 0, 0, 0), MetricUnit::Week, 1);
        let sunday = bucket_label(at(2024, 5, 12, 23, 59, 59), MetricUnit::Week, 1);
        assert_eq!(monday, "202420");
        assert_eq!(sunday, "202420");
        assert_eq!(
            bucket_label(at(2024, 5, 13, 0, 0, 0), MetricUnit::Week, 1),
            "202421"
        );
    }

    #[test]
    fn test_month_and_year_buckets() {
        assert_eq!(
            bucket_label(at(2024, 5, 6, 0, 0, 0), MetricUnit::Month, 1),
            "202406"
        );
        assert_eq!(
            bucket_label(at(2024, 12, 31, 0, 0, 0), MetricUnit::Month, 1),
            "202501"
        );
        assert_eq!(
            bucket_label(at(2024, 5, 6, 0, 0, 0), MetricUnit::Year, 1),
            "2025"
        );
    }

    #[test]
    fn test_non_positive_interval_is_one() {
        let t = at(2024, 5, 6, 9, 7, 0);
        assert_eq!(
            bucket_label(t, MetricUnit::Minute, 0),
            bucket_label(t, MetricUnit::Minute, 1)
        );
        assert_eq!(window(MetricUnit::Minute, -3), Duration::from_secs(60));
    }

    #[test]
    fn test_window_durations() {
        assert_eq!(window(MetricUnit::Minute, 10), Duration::from_secs(600));
        assert_eq!(window(MetricUnit::Month, 1), Duration::from_secs(30 * 86_400));
        assert_eq!(window(MetricUnit::Year, 2), Duration::from_secs(730 * 86_400));
    }
}
