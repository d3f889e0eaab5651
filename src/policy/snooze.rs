//! Snooze / mute lifecycle
//!
//! Expiry is lazy: a snooze stops applying once the clock passes
//! `snoozed_until`, with no timer involved.

use super::AlertPolicies;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Persisted snooze expiry for one dedupe key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeState {
    pub snoozed_until: DateTime<Utc>,
}

impl AlertPolicies {
    fn snooze_key(&self, student_id: &str, dedupe_key: &str) -> String {
        self.state().key(&["snooze", student_id, dedupe_key])
    }

    /// Mute the key for `hours` from now; returns the expiry.
    ///
    /// Non-positive or non-finite durations are ignored.
    pub fn snooze(&self, student_id: &str, dedupe_key: &str, hours: f64) -> Option<DateTime<Utc>> {
        if !hours.is_finite() || hours <= 0.0 {
            tracing::warn!(student_id, dedupe_key, hours, "ignoring snooze with invalid duration");
            return None;
        }

        let millis = (hours * MS_PER_HOUR).round().min(i64::MAX as f64) as i64;
        let until = self
            .now()
            .checked_add_signed(Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.state()
            .save(&self.snooze_key(student_id, dedupe_key), &SnoozeState { snoozed_until: until });
        tracing::debug!(student_id, dedupe_key, until = %until, "snoozed");
        Some(until)
    }

    /// Same as [`AlertPolicies::snooze`], in days
    pub fn dont_show_for_days(&self, student_id: &str, dedupe_key: &str, days: f64) -> Option<DateTime<Utc>> {
        self.snooze(student_id, dedupe_key, days * 24.0)
    }

    /// Lift a snooze immediately
    pub fn unsnooze(&self, student_id: &str, dedupe_key: &str) {
        self.state().remove(&self.snooze_key(student_id, dedupe_key));
    }

    pub fn is_snoozed(&self, student_id: &str, dedupe_key: &str) -> bool {
        self.snoozed_until(student_id, dedupe_key).is_some()
    }

    /// Expiry of an active snooze. An expired entry is deleted on read.
    pub fn snoozed_until(&self, student_id: &str, dedupe_key: &str) -> Option<DateTime<Utc>> {
        let key = self.snooze_key(student_id, dedupe_key);
        let state: SnoozeState = self.state().load(&key)?;
        if self.now() < state.snoozed_until {
            return Some(state.snoozed_until);
        }
        self.state().remove(&key);
        None
    }
}
