//! Alert policy engine
//!
//! [`AlertPolicies`] is the gate between "a detector thinks this is noteworthy"
//! and "a human is shown this". Stateless checks (settings validation, quiet
//! hours, deduplication, cap annotation) are pure; throttle, snooze, daily
//! admission counters and the audit trail are persisted through a namespaced
//! key-value store so independent engines never observe each other's state.

pub mod admission;
pub mod audit;
pub mod dedupe;
pub mod quiet_hours;
pub mod settings;
pub mod snooze;
pub mod throttle;

pub use admission::{DailyCapRecord, DailyCounts, DayCounts, REASON_CAP_EXCEEDED, REASON_SNOOZED, REASON_WITHIN_LIMITS};
pub use dedupe::{calculate_dedupe_key, deduplicate_alerts, enforce_cap_limits, DEFAULT_CONTEXT_KEY};
pub use settings::{
    assert_valid_alert_settings, daily_cap, default_daily_cap, parse_time_of_day,
    validate_alert_settings, SettingsValidation, UNBOUNDED_CAP,
};
pub use snooze::SnoozeState;
pub use throttle::{compute_throttle_delay, ThrottleState};

use crate::clock::{Clock, SystemClock};
use crate::error::ValidationError;
use crate::storage::{KeyValueStore, MemoryStore, NamespacedStore};
use crate::types::{AlertEvent, AlertSettings};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default deduplication window (1 hour)
pub const DEDUPE_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Base backoff delay before severity scaling (5 minutes)
pub const BASE_THROTTLE_DELAY_MS: u64 = 5 * 60 * 1000;

/// Absolute ceiling on any backoff delay (24 hours)
pub const MAX_THROTTLE_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Audit entries retained per student
pub const MAX_AUDIT_ENTRIES: usize = 500;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "alert-policies";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Prefix of every persisted key
    pub namespace: String,
    pub base_throttle_delay_ms: u64,
    /// Further bounded by [`MAX_THROTTLE_DELAY_MS`]
    pub max_throttle_delay_ms: u64,
    pub dedupe_window_ms: u64,
    pub max_audit_entries: usize,
    /// Offset used for time-of-day and calendar-day decisions
    pub utc_offset_minutes: i32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            base_throttle_delay_ms: BASE_THROTTLE_DELAY_MS,
            max_throttle_delay_ms: MAX_THROTTLE_DELAY_MS,
            dedupe_window_ms: DEDUPE_WINDOW_MS,
            max_audit_entries: MAX_AUDIT_ENTRIES,
            utc_offset_minutes: 0,
        }
    }
}

impl PolicyConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Local offset; out-of-range values fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Ceiling applied to every computed delay
    pub fn delay_ceiling_ms(&self) -> u64 {
        self.max_throttle_delay_ms.min(MAX_THROTTLE_DELAY_MS)
    }
}

/// Stateful, namespace-isolated alert admission policies
pub struct AlertPolicies {
    config: PolicyConfig,
    state: NamespacedStore,
    clock: Arc<dyn Clock>,
}

impl AlertPolicies {
    /// Engine with default configuration under `namespace`
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(PolicyConfig::with_namespace(namespace), store, clock)
    }

    pub fn with_config(
        config: PolicyConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = NamespacedStore::new(config.namespace.clone(), store);
        Self {
            config,
            state,
            clock,
        }
    }

    /// Engine over a private in-memory store and the wall clock
    pub fn in_memory() -> Self {
        Self::with_config(
            PolicyConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        self.state.namespace()
    }

    /// Whether a persistence read or write has failed (state may be stale)
    pub fn storage_degraded(&self) -> bool {
        self.state.is_degraded()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn state(&self) -> &NamespacedStore {
        &self.state
    }

    pub fn validate_alert_settings(&self, settings: &AlertSettings) -> SettingsValidation {
        validate_alert_settings(settings)
    }

    pub fn assert_valid_alert_settings(
        &self,
        settings: &AlertSettings,
    ) -> Result<AlertSettings, ValidationError> {
        assert_valid_alert_settings(settings)
    }

    /// Whether `at` falls in the student's quiet hours (local to the configured offset)
    pub fn is_in_quiet_hours(
        &self,
        student_id: &str,
        settings: &AlertSettings,
        at: DateTime<Utc>,
    ) -> bool {
        let in_window = settings
            .quiet_hours
            .as_ref()
            .is_some_and(|qh| quiet_hours::in_quiet_window(qh, at, self.config.offset()));
        if in_window {
            tracing::debug!(student_id, at = %at, "inside quiet hours");
        }
        in_window
    }

    pub fn calculate_dedupe_key(&self, alert: &AlertEvent) -> String {
        calculate_dedupe_key(alert)
    }

    /// Deduplicate with the configured window
    pub fn deduplicate_alerts(&self, alerts: &[AlertEvent]) -> Vec<AlertEvent> {
        deduplicate_alerts(alerts, self.config.dedupe_window_ms)
    }

    pub fn deduplicate_alerts_within(&self, alerts: &[AlertEvent], window_ms: u64) -> Vec<AlertEvent> {
        deduplicate_alerts(alerts, window_ms)
    }

    /// Annotate daily-cap overflow using the configured calendar offset
    pub fn enforce_cap_limits(&self, alerts: &[AlertEvent], settings: &AlertSettings) -> Vec<AlertEvent> {
        enforce_cap_limits(alerts, settings, self.config.offset())
    }
}
