//! Quiet-hours evaluation

use super::settings::parse_time_of_day;
use crate::types::QuietHours;
use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};

/// Whether `at`, seen in the `offset` local time, falls in the quiet window.
///
/// `start <= end` is a same-day window `[start, end)`; `start > end` crosses
/// midnight. When `days_of_week` is non-empty (0 = Sunday) the window only applies on
/// those days, judged by the local weekday of `at`. Unparsable bounds never
/// match.
pub fn in_quiet_window(quiet: &QuietHours, at: DateTime<Utc>, offset: FixedOffset) -> bool {
    let (start, end) = match (parse_time_of_day(&quiet.start), parse_time_of_day(&quiet.end)) {
        (Some(start), Some(end)) => (start, end),
        _ => return false,
    };

    let local = offset.from_utc_datetime(&at.naive_utc());

    if let Some(days) = quiet.days_of_week.as_ref().filter(|d| !d.is_empty()) {
        let weekday = i64::from(local.weekday().num_days_from_sunday());
        if !days.contains(&weekday) {
            return false;
        }
    }

    let minute_of_day = local.hour() * 60 + local.minute();
    if start <= end {
        start <= minute_of_day && minute_of_day < end
    } else {
        minute_of_day >= start || minute_of_day < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // 2024-01-15 is a Monday
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn window(start: &str, end: &str, days: Option<Vec<i64>>) -> QuietHours {
        QuietHours {
            start: start.to_string(),
            end: end.to_string(),
            days_of_week: days,
        }
    }

    #[test]
    fn test_overnight_window() {
        let qh = window("22:00", "07:00", None);
        assert!(in_quiet_window(&qh, at(23, 30), utc()));
        assert!(in_quiet_window(&qh, at(6, 30), utc()));
        assert!(in_quiet_window(&qh, at(22, 0), utc()));
        assert!(!in_quiet_window(&qh, at(7, 0), utc()));
        assert!(!in_quiet_window(&qh, at(12, 0), utc()));
    }

    #[test]
    fn test_same_day_window_is_half_open() {
        let qh = window("12:00", "13:00", None);
        assert!(in_quiet_window(&qh, at(12, 0), utc()));
        assert!(in_quiet_window(&qh, at(12, 59), utc()));
        assert!(!in_quiet_window(&qh, at(13, 0), utc()));
        assert!(!in_quiet_window(&qh, at(11, 59), utc()));
    }

    #[test]
    fn test_equal_bounds_is_empty_window() {
        let qh = window("09:00", "09:00", None);
        assert!(!in_quiet_window(&qh, at(9, 0), utc()));
    }

    #[test]
    fn test_days_of_week_scope() {
        let monday_only = window("12:00", "13:00", Some(vec![1]));
        let weekend_only = window("12:00", "13:00", Some(vec![0, 6]));
        assert!(in_quiet_window(&monday_only, at(12, 30), utc()));
        assert!(!in_quiet_window(&weekend_only, at(12, 30), utc()));
        let no_days = window("12:00", "13:00", Some(Vec::new()));
        assert!(in_quiet_window(&no_days, at(12, 30), utc()));
    }

    #[test]
    fn test_local_offset_shifts_time_and_day() {
        // 23:30 UTC Monday is 01:30 Tuesday at UTC+2
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let overnight = window("22:00", "07:00", None);
        assert!(in_quiet_window(&overnight, at(23, 30), offset));

        let tuesday_early = window("01:00", "02:00", Some(vec![2]));
        assert!(in_quiet_window(&tuesday_early, at(23, 30), offset));
        assert!(!in_quiet_window(&tuesday_early, at(23, 30), utc()));
    }

    #[test]
    fn test_malformed_window_never_matches() {
        let qh = window("25:00", "07:00", None);
        assert!(!in_quiet_window(&qh, at(23, 30), utc()));
    }
}
