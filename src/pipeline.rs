//! Governance pipeline
//!
//! Runs a batch of candidate alerts through the policy engine end to end:
//! deduplication → throttle check → admission (snooze, daily cap) → quiet hours.

use crate::clock::Clock;
use crate::error::GovernanceError;
use crate::policy::{
    validate_alert_settings, AlertPolicies, PolicyConfig, REASON_CAP_EXCEEDED, REASON_SNOOZED,
};
use crate::storage::KeyValueStore;
use crate::types::{AlertEvent, AlertSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reason recorded for alerts still inside their backoff window
pub const REASON_THROTTLED: &str = "throttled";

/// An alert that will not be shown, with why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedAlert {
    pub alert: AlertEvent,
    pub reasons: Vec<String>,
}

/// Outcome of governing one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceReport {
    /// Admitted and outside quiet hours
    pub delivered: Vec<AlertEvent>,
    /// Admitted but inside quiet hours; deliver once they end
    pub deferred: Vec<AlertEvent>,
    pub suppressed: Vec<SuppressedAlert>,
    /// Candidates merged into another alert by deduplication
    pub duplicates_collapsed: usize,
    /// Settings problems repaired before governing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings_errors: Vec<String>,
    /// Persistence failed at some point; throttle/snooze/cap state may be stale
    #[serde(default)]
    pub storage_degraded: bool,
}

impl GovernanceReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Govern a JSON array of candidate alerts against optional JSON settings.
///
/// Uses a fresh in-memory engine, so no state carries over between calls.
///
/// # Arguments
/// * `candidates_json` - JSON array of `AlertEvent`
/// * `settings_json` - JSON `AlertSettings`, defaults when `None`
///
/// # Returns
/// JSON-encoded `GovernanceReport`
///
/// # Example
/// ```ignore
/// let report = govern_alerts_json(candidates, Some(r#"{"daily_caps":{"low":1}}"#))?;
/// ```
pub fn govern_alerts_json(
    candidates_json: &str,
    settings_json: Option<&str>,
) -> Result<String, GovernanceError> {
    AlertGovernor::in_memory().govern_json(candidates_json, settings_json)
}

/// Stateful governor over a persisted policy engine.
///
/// Use this when throttle, snooze and cap state must carry across batches.
pub struct AlertGovernor {
    policies: AlertPolicies,
}

impl AlertGovernor {
    pub fn new(policies: AlertPolicies) -> Self {
        Self { policies }
    }

    pub fn with_config(config: PolicyConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(AlertPolicies::with_config(config, store, clock))
    }

    /// Governor over a private in-memory store and the wall clock
    pub fn in_memory() -> Self {
        Self::new(AlertPolicies::in_memory())
    }

    pub fn policies(&self) -> &AlertPolicies {
        &self.policies
    }

    /// Govern `candidates` in `created_at` order.
    ///
    /// Throttled alerts count as another attempt on their key; admitted alerts
    /// record an attempt too so that recurrences back off.
    pub fn govern(&self, candidates: &[AlertEvent], settings: &AlertSettings) -> GovernanceReport {
        let validation = validate_alert_settings(settings);
        let settings = validation.normalized;

        let unique = self.policies.deduplicate_alerts(candidates);
        let mut report = GovernanceReport {
            duplicates_collapsed: candidates.len() - unique.len(),
            settings_errors: validation.errors,
            ..Default::default()
        };

        for mut alert in unique {
            let dedupe_key = alert.dedupe_key();

            if self.policies.should_throttle(&alert, Some(&settings)).throttled {
                self.policies.record_throttle_attempt(&alert.student_id, &dedupe_key);
                alert.governance.throttled = true;
                report.suppressed.push(SuppressedAlert {
                    alert,
                    reasons: vec![REASON_THROTTLED.to_string()],
                });
                continue;
            }

            let decision = self.policies.can_create_alert(&alert, &settings);
            alert.governance = decision.status;

            if !decision.allowed {
                let mut reasons = Vec::new();
                if decision.status.snoozed {
                    alert.mark_snoozed();
                    reasons.push(REASON_SNOOZED.to_string());
                }
                if decision.status.cap_exceeded {
                    reasons.push(REASON_CAP_EXCEEDED.to_string());
                }
                report.suppressed.push(SuppressedAlert { alert, reasons });
                continue;
            }

            self.policies.record_throttle_attempt(&alert.student_id, &dedupe_key);

            if self
                .policies
                .is_in_quiet_hours(&alert.student_id, &settings, alert.created_at)
            {
                alert.governance.quiet_hours = true;
                report.deferred.push(alert);
            } else {
                report.delivered.push(alert);
            }
        }

        report.storage_degraded = self.policies.storage_degraded();
        tracing::debug!(
            delivered = report.delivered.len(),
            deferred = report.deferred.len(),
            suppressed = report.suppressed.len(),
            duplicates = report.duplicates_collapsed,
            "batch governed"
        );
        report
    }

    /// JSON in, JSON out form of [`AlertGovernor::govern`]
    pub fn govern_json(
        &self,
        candidates_json: &str,
        settings_json: Option<&str>,
    ) -> Result<String, GovernanceError> {
        let candidates: Vec<AlertEvent> = serde_json::from_str(candidates_json)?;
        let settings: AlertSettings = match settings_json {
            Some(json) => serde_json::from_str(json)?,
            None => AlertSettings::default(),
        };
        Ok(self.govern(&candidates, &settings).to_json()?)
    }
}
