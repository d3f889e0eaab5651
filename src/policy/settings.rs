//! Settings validation and normalization
//!
//! Normalization is total: every malformed field is repaired to a deterministic
//! safe value and described in `errors`. The strict entry point turns any
//! recorded error into a [`ValidationError`].

use crate::error::ValidationError;
use crate::types::{AlertSettings, QuietHours, Severity, ThrottleSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel for "no daily ceiling" (2^53 - 1, exactly representable as f64)
pub const UNBOUNDED_CAP: u64 = 9_007_199_254_740_991;

/// Cap applied when a severity has no configured ceiling
pub fn default_daily_cap(severity: Severity) -> u64 {
    match severity {
        Severity::Critical => UNBOUNDED_CAP,
        Severity::Important => 10,
        Severity::Moderate => 5,
        Severity::Low => 3,
    }
}

/// Outcome of [`validate_alert_settings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub normalized: AlertSettings,
}

/// Parse "HH:MM" (24h clock) into minutes since midnight
pub fn parse_time_of_day(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Effective daily cap for `severity`, tolerating unnormalized input.
///
/// Missing entries take [`default_daily_cap`]; negative or NaN values are
/// treated as unbounded; fractional values are floored.
pub fn daily_cap(settings: &AlertSettings, severity: Severity) -> u64 {
    match settings.daily_caps.get(&severity) {
        None => default_daily_cap(severity),
        Some(&value) => sanitize_cap(value).unwrap_or(UNBOUNDED_CAP),
    }
}

// None when the value is unusable
fn sanitize_cap(value: f64) -> Option<u64> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    if value >= UNBOUNDED_CAP as f64 {
        return Some(UNBOUNDED_CAP);
    }
    Some(value.floor() as u64)
}

/// Validate and normalize settings. Never fails.
pub fn validate_alert_settings(settings: &AlertSettings) -> SettingsValidation {
    let mut errors = Vec::new();

    let quiet_hours = settings
        .quiet_hours
        .as_ref()
        .and_then(|qh| normalize_quiet_hours(qh, &mut errors));

    let mut daily_caps = BTreeMap::new();
    for severity in Severity::ALL {
        let cap = match settings.daily_caps.get(&severity) {
            None => default_daily_cap(severity),
            Some(&value) => match sanitize_cap(value) {
                Some(cap) => cap,
                None => {
                    errors.push(format!(
                        "daily_caps.{}: invalid cap {}; treating as unbounded",
                        severity, value
                    ));
                    UNBOUNDED_CAP
                }
            },
        };
        daily_caps.insert(severity, cap as f64);
    }

    let throttle = settings
        .throttle
        .as_ref()
        .map(|t| normalize_throttle(t, &mut errors));

    if !errors.is_empty() {
        tracing::warn!(errors = ?errors, "alert settings normalized");
    }

    SettingsValidation {
        is_valid: errors.is_empty(),
        errors,
        normalized: AlertSettings {
            quiet_hours,
            daily_caps,
            throttle,
        },
    }
}

/// Strict variant: normalized settings, or every problem found
pub fn assert_valid_alert_settings(settings: &AlertSettings) -> Result<AlertSettings, ValidationError> {
    let validation = validate_alert_settings(settings);
    if validation.is_valid {
        Ok(validation.normalized)
    } else {
        Err(ValidationError::new(validation.errors))
    }
}

fn normalize_quiet_hours(quiet: &QuietHours, errors: &mut Vec<String>) -> Option<QuietHours> {
    let start = parse_time_of_day(&quiet.start);
    let end = parse_time_of_day(&quiet.end);

    if start.is_none() {
        errors.push(format!("quiet_hours.start: invalid time '{}'", quiet.start));
    }
    if end.is_none() {
        errors.push(format!("quiet_hours.end: invalid time '{}'", quiet.end));
    }
    let (start, end) = (start?, end?);

    // An empty day filter means every day
    let days_of_week = quiet.days_of_week.as_ref().and_then(|days| {
        let mut valid: Vec<i64> = Vec::with_capacity(days.len());
        for &day in days {
            if (0..=6).contains(&day) {
                if !valid.contains(&day) {
                    valid.push(day);
                }
            } else {
                errors.push(format!("quiet_hours.days_of_week: invalid day {}", day));
            }
        }
        if valid.is_empty() {
            if !days.is_empty() {
                errors.push(
                    "quiet_hours.days_of_week: no valid days; window applies every day".to_string(),
                );
            }
            return None;
        }
        valid.sort_unstable();
        Some(valid)
    });

    Some(QuietHours {
        start: format!("{:02}:{:02}", start / 60, start % 60),
        end: format!("{:02}:{:02}", end / 60, end % 60),
        days_of_week,
    })
}

fn normalize_throttle(throttle: &ThrottleSettings, errors: &mut Vec<String>) -> ThrottleSettings {
    let mut max_delay_by_severity = BTreeMap::new();
    for (&severity, &delay) in &throttle.max_delay_by_severity {
        if delay.is_finite() && delay >= 0.0 {
            max_delay_by_severity.insert(severity, delay.floor());
        } else {
            errors.push(format!(
                "throttle.max_delay_by_severity.{}: invalid delay {}",
                severity, delay
            ));
        }
    }
    ThrottleSettings {
        max_delay_by_severity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(quiet: Option<QuietHours>, caps: &[(Severity, f64)]) -> AlertSettings {
        AlertSettings {
            quiet_hours: quiet,
            daily_caps: caps.iter().copied().collect(),
            throttle: None,
        }
    }

    fn quiet(start: &str, end: &str) -> QuietHours {
        QuietHours {
            start: start.to_string(),
            end: end.to_string(),
            days_of_week: None,
        }
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("00:00"), Some(0));
        assert_eq!(parse_time_of_day("07:30"), Some(450));
        assert_eq!(parse_time_of_day("7:30"), Some(450));
        assert_eq!(parse_time_of_day("23:59"), Some(1439));
        assert_eq!(parse_time_of_day("24:00"), None);
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day("12:60"), None);
        assert_eq!(parse_time_of_day("12:5"), None);
        assert_eq!(parse_time_of_day("noon"), None);
        assert_eq!(parse_time_of_day(""), None);
    }

    #[test]
    fn test_valid_settings_pass_through() {
        let settings = settings_with(
            Some(quiet("22:00", "07:00")),
            &[(Severity::Critical, 1.0), (Severity::Moderate, 4.0)],
        );
        let validation = validate_alert_settings(&settings);

        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
        assert_eq!(validation.normalized.quiet_hours, Some(quiet("22:00", "07:00")));
        assert_eq!(validation.normalized.daily_caps[&Severity::Critical], 1.0);
        assert_eq!(validation.normalized.daily_caps[&Severity::Moderate], 4.0);
        // Missing severities are filled with defaults
        assert_eq!(validation.normalized.daily_caps[&Severity::Low], 3.0);
    }

    #[test]
    fn test_invalid_input_is_normalized_without_failing() {
        let settings = settings_with(
            Some(quiet("25:00", "07:00")),
            &[(Severity::Low, -2.0), (Severity::Moderate, f64::NAN)],
        );
        let validation = validate_alert_settings(&settings);

        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 3);
        assert!(validation.normalized.quiet_hours.is_none());
        assert_eq!(
            validation.normalized.daily_caps[&Severity::Low],
            UNBOUNDED_CAP as f64
        );
        assert_eq!(
            validation.normalized.daily_caps[&Severity::Moderate],
            UNBOUNDED_CAP as f64
        );
    }

    #[test]
    fn test_assert_valid_settings() {
        let bad = settings_with(Some(quiet("25:00", "07:00")), &[(Severity::Low, -1.0)]);
        let err = assert_valid_alert_settings(&bad).unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert!(err.to_string().contains("25:00"));

        let good = settings_with(None, &[(Severity::Important, 2.0)]);
        let normalized = assert_valid_alert_settings(&good).unwrap();
        assert_eq!(normalized.daily_caps[&Severity::Important], 2.0);
    }

    #[test]
    fn test_days_of_week_are_filtered() {
        let settings = settings_with(
            Some(QuietHours {
                start: "8:00".to_string(),
                end: "09:15".to_string(),
                days_of_week: Some(vec![5, 1, 9, 1, -1]),
            }),
            &[],
        );
        let validation = validate_alert_settings(&settings);
        let qh = validation.normalized.quiet_hours.unwrap();

        assert_eq!(qh.start, "08:00");
        assert_eq!(qh.days_of_week, Some(vec![1, 5]));
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn test_days_of_week_without_valid_entries_become_every_day() {
        let settings = settings_with(
            Some(QuietHours {
                start: "22:00".to_string(),
                end: "07:00".to_string(),
                days_of_week: Some(vec![7, -2]),
            }),
            &[],
        );
        let validation = validate_alert_settings(&settings);

        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 3);
        assert!(validation.errors[2].contains("applies every day"));
        assert_eq!(validation.normalized.quiet_hours.unwrap().days_of_week, None);

        let explicit_empty = settings_with(
            Some(QuietHours {
                start: "22:00".to_string(),
                end: "07:00".to_string(),
                days_of_week: Some(Vec::new()),
            }),
            &[],
        );
        let validation = validate_alert_settings(&explicit_empty);
        assert!(validation.is_valid);
        assert_eq!(validation.normalized.quiet_hours.unwrap().days_of_week, None);
    }

    #[test]
    fn test_daily_cap_lookup() {
        let settings = settings_with(None, &[(Severity::Moderate, 2.7), (Severity::Low, -1.0)]);
        assert_eq!(daily_cap(&settings, Severity::Moderate), 2);
        assert_eq!(daily_cap(&settings, Severity::Low), UNBOUNDED_CAP);
        assert_eq!(daily_cap(&settings, Severity::Important), 10);
        assert_eq!(daily_cap(&settings, Severity::Critical), UNBOUNDED_CAP);
    }

    #[test]
    fn test_throttle_overrides_are_sanitized() {
        let settings = AlertSettings {
            throttle: Some(ThrottleSettings {
                max_delay_by_severity: [(Severity::Low, 60_000.0), (Severity::Critical, -5.0)]
                    .into_iter()
                    .collect(),
            }),
            ..Default::default()
        };
        let validation = validate_alert_settings(&settings);
        let throttle = validation.normalized.throttle.unwrap();

        assert_eq!(throttle.max_delay_by_severity.len(), 1);
        assert_eq!(throttle.max_delay_by_severity[&Severity::Low], 60_000.0);
        assert_eq!(validation.errors.len(), 1);
    }
}
