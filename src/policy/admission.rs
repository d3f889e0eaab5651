//! Composite admission: snooze, then the persisted daily cap

use super::settings::daily_cap;
use super::AlertPolicies;
use crate::types::{
    AdmissionDecision, AlertEvent, AlertSettings, AuditDecision, AuditTrailEntry, Governance, Severity,
};
use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Admissions per severity for one student and local day
pub type DailyCounts = BTreeMap<Severity, u64>;

/// Local days of counts kept per student: the current one and the day before
const CAP_DAYS_RETAINED: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounts {
    pub day: NaiveDate,
    pub counts: DailyCounts,
}

/// Persisted admission counts for a student's most recent local days.
///
/// One record per student; rolling into a new day drops the oldest entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCapRecord {
    pub days: Vec<DayCounts>,
}

impl DailyCapRecord {
    pub fn counts_for(&self, day: NaiveDate) -> DailyCounts {
        self.days
            .iter()
            .find(|d| d.day == day)
            .map(|d| d.counts.clone())
            .unwrap_or_default()
    }

    // Days older than the retained range are dropped again right away
    fn replace(&mut self, day: NaiveDate, counts: DailyCounts) {
        self.days.retain(|d| d.day != day);
        self.days.push(DayCounts { day, counts });
        self.days.sort_by_key(|d| d.day);
        let excess = self.days.len().saturating_sub(CAP_DAYS_RETAINED);
        self.days.drain(..excess);
    }
}

pub const REASON_SNOOZED: &str = "snoozed";
pub const REASON_CAP_EXCEEDED: &str = "daily_cap_exceeded";
pub const REASON_WITHIN_LIMITS: &str = "within_limits";

impl AlertPolicies {
    fn caps_key(&self, student_id: &str) -> String {
        self.state().key(&["caps", student_id])
    }

    /// Local calendar day of `alert` in the configured offset
    pub fn local_day(&self, alert: &AlertEvent) -> NaiveDate {
        self.config()
            .offset()
            .from_utc_datetime(&alert.created_at.naive_utc())
            .date_naive()
    }

    /// Alerts admitted so far on `day`, by severity
    pub fn daily_admissions(&self, student_id: &str, day: NaiveDate) -> DailyCounts {
        self.state()
            .load::<DailyCapRecord>(&self.caps_key(student_id))
            .unwrap_or_default()
            .counts_for(day)
    }

    /// Decide whether `alert` may be shown.
    ///
    /// Snooze is checked first, then the daily cap for the alert's severity on
    /// its local day. The cap counter is consumed only when the alert is
    /// allowed. Quiet hours and throttling are separate checks and are not
    /// reflected here. Exactly one audit entry is appended per call.
    pub fn can_create_alert(&self, alert: &AlertEvent, settings: &AlertSettings) -> AdmissionDecision {
        let dedupe_key = alert.dedupe_key();
        let snoozed = self.is_snoozed(&alert.student_id, &dedupe_key);

        let day = self.local_day(alert);
        let caps_key = self.caps_key(&alert.student_id);
        let mut record: DailyCapRecord = self.state().load(&caps_key).unwrap_or_default();
        let mut counts = record.counts_for(day);
        let used = counts.get(&alert.severity).copied().unwrap_or(0);
        let cap_exceeded = used >= daily_cap(settings, alert.severity);

        let status = Governance {
            cap_exceeded,
            snoozed,
            ..Governance::default()
        };
        let allowed = !status.is_blocked();

        if allowed {
            counts.insert(alert.severity, used.saturating_add(1));
            record.replace(day, counts);
            self.state().save(&caps_key, &record);
        }

        let mut reasons = Vec::new();
        if snoozed {
            reasons.push(REASON_SNOOZED.to_string());
        }
        if cap_exceeded {
            reasons.push(REASON_CAP_EXCEEDED.to_string());
        }
        if reasons.is_empty() {
            reasons.push(REASON_WITHIN_LIMITS.to_string());
        }

        let decision = if allowed {
            AuditDecision::Allowed
        } else {
            AuditDecision::Denied
        };
        tracing::debug!(
            student_id = %alert.student_id,
            dedupe_key = %dedupe_key,
            decision = ?decision,
            reasons = ?reasons,
            "admission decided"
        );

        self.append_audit(AuditTrailEntry {
            alert_id: alert.id.clone(),
            student_id: alert.student_id.clone(),
            decision,
            reasons,
            timestamp: self.now(),
        });

        AdmissionDecision { allowed, status }
    }
}
