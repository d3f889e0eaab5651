//! Severity-aware exponential backoff
//!
//! Each `(student, dedupe key)` pair carries a persisted attempt counter. The
//! delay before a recurring alert is eligible again is
//! `min(base * factor(severity) * 2^attempts, cap(severity))`, measured from
//! the instant the current backoff streak started (the last admission).
//! Throttled repeats raise the attempt count without moving that instant.

use super::{AlertPolicies, PolicyConfig};
use crate::types::{AlertEvent, AlertSettings, Severity, ThrottleCheck};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// 2^63 already saturates every realistic ceiling
const MAX_EXPONENT: u32 = 63;

/// Persisted backoff state for one dedupe key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThrottleState {
    pub attempts: u32,
    /// When the first attempt of the current streak was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
}

/// Backoff delay in milliseconds.
///
/// With a severity, the base delay is scaled by [`Severity::throttle_factor`]
/// and bounded by the smallest override configured for that severity or any
/// less urgent one, so delays stay ordered `Critical <= ... <= Low` for equal
/// attempts. Without a severity the factor is 1 and every override applies.
/// The result never exceeds the configured ceiling.
pub fn compute_throttle_delay(
    config: &PolicyConfig,
    severity: Option<Severity>,
    attempts: u32,
    settings: Option<&AlertSettings>,
) -> u64 {
    let factor = severity.map_or(1.0, |s| s.throttle_factor());
    let exponent = attempts.min(MAX_EXPONENT) as i32;
    let raw = config.base_throttle_delay_ms as f64 * factor * 2f64.powi(exponent);

    let ceiling = config.delay_ceiling_ms() as f64;
    let cap = settings
        .and_then(|s| s.throttle.as_ref())
        .map(|t| {
            t.max_delay_by_severity
                .iter()
                .filter(|(&s, _)| severity.map_or(true, |sev| s <= sev))
                .map(|(_, &ms)| ms)
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .fold(ceiling, f64::min)
        })
        .unwrap_or(ceiling);

    raw.min(cap).floor() as u64
}

fn delay_as_duration(delay_ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX / 1_000))
}

impl AlertPolicies {
    fn throttle_key(&self, student_id: &str, dedupe_key: &str) -> String {
        self.state().key(&["throttle", student_id, dedupe_key])
    }

    /// Current persisted backoff state (zeroed when absent or unreadable)
    pub fn throttle_state(&self, student_id: &str, dedupe_key: &str) -> ThrottleState {
        self.state()
            .load(&self.throttle_key(student_id, dedupe_key))
            .unwrap_or_default()
    }

    /// Increment the attempt counter; returns the new count.
    ///
    /// The first attempt of a streak anchors the backoff window at the current
    /// instant; later attempts only raise the count.
    pub fn record_throttle_attempt(&self, student_id: &str, dedupe_key: &str) -> u32 {
        let key = self.throttle_key(student_id, dedupe_key);
        let mut state: ThrottleState = self.state().load(&key).unwrap_or_default();
        if state.attempts == 0 || state.window_start.is_none() {
            state.window_start = Some(self.now());
        }
        state.attempts = state.attempts.saturating_add(1);
        self.state().save(&key, &state);

        tracing::debug!(student_id, dedupe_key, attempts = state.attempts, "throttle attempt recorded");
        state.attempts
    }

    /// Severity-agnostic delay for the key's current attempt count
    pub fn get_throttle_delay(
        &self,
        student_id: &str,
        dedupe_key: &str,
        settings: Option<&AlertSettings>,
    ) -> u64 {
        let attempts = self.throttle_state(student_id, dedupe_key).attempts;
        compute_throttle_delay(self.config(), None, attempts, settings)
    }

    /// Delay for `alert`, scaled by its severity
    pub fn get_throttle_delay_for(&self, alert: &AlertEvent, settings: Option<&AlertSettings>) -> u64 {
        let attempts = self.throttle_state(&alert.student_id, &alert.dedupe_key()).attempts;
        compute_throttle_delay(self.config(), Some(alert.severity), attempts, settings)
    }

    /// Whether `alert` is still inside its backoff window.
    ///
    /// The window runs from the streak's `window_start` for the delay of the
    /// current attempt count. A key with no recorded attempts is always
    /// eligible. Once eligible, the state is cleared so the situation starts
    /// fresh.
    pub fn should_throttle(&self, alert: &AlertEvent, settings: Option<&AlertSettings>) -> ThrottleCheck {
        let dedupe_key = alert.dedupe_key();
        let state = self.throttle_state(&alert.student_id, &dedupe_key);
        if state.attempts == 0 {
            return ThrottleCheck {
                throttled: false,
                next_eligible_at: None,
            };
        }

        let delay_ms = compute_throttle_delay(self.config(), Some(alert.severity), state.attempts, settings);
        let eligible_at = state
            .window_start
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .checked_add_signed(delay_as_duration(delay_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if self.now() < eligible_at {
            tracing::debug!(
                student_id = %alert.student_id,
                dedupe_key = %dedupe_key,
                attempts = state.attempts,
                delay_ms,
                "alert throttled"
            );
            return ThrottleCheck {
                throttled: true,
                next_eligible_at: Some(eligible_at),
            };
        }

        self.reset_throttle(&alert.student_id, &dedupe_key);
        ThrottleCheck {
            throttled: false,
            next_eligible_at: None,
        }
    }

    /// Forget the key's backoff state
    pub fn reset_throttle(&self, student_id: &str, dedupe_key: &str) {
        self.state().remove(&self.throttle_key(student_id, dedupe_key));
    }
}
