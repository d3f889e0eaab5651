//! Append-only, bounded audit trail of admission decisions

use super::AlertPolicies;
use crate::types::AuditTrailEntry;

impl AlertPolicies {
    fn audit_key(&self, student_id: &str) -> String {
        self.state().key(&["audit", student_id])
    }

    pub(crate) fn append_audit(&self, entry: AuditTrailEntry) {
        let key = self.audit_key(&entry.student_id);
        let mut trail: Vec<AuditTrailEntry> = self.state().load(&key).unwrap_or_default();
        trail.push(entry);

        let max = self.config().max_audit_entries;
        if trail.len() > max {
            trail.drain(..trail.len() - max);
        }
        self.state().save(&key, &trail);
    }

    /// The most recent `limit` entries, oldest first
    pub fn get_audit_trail(&self, student_id: &str, limit: usize) -> Vec<AuditTrailEntry> {
        let mut trail: Vec<AuditTrailEntry> = self
            .state()
            .load(&self.audit_key(student_id))
            .unwrap_or_default();
        if trail.len() > limit {
            trail.drain(..trail.len() - limit);
        }
        trail
    }

    /// Pretty-printed JSON array of [`AlertPolicies::get_audit_trail`]
    pub fn export_audit_trail(&self, student_id: &str, limit: usize) -> String {
        let trail = self.get_audit_trail(student_id, limit);
        serde_json::to_string_pretty(&trail).unwrap_or_else(|e| {
            tracing::warn!(student_id, error = %e, "audit export failed");
            "[]".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::policy::PolicyConfig;
    use crate::storage::MemoryStore;
    use crate::types::AuditDecision;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn entry(n: i64) -> AuditTrailEntry {
        AuditTrailEntry {
            alert_id: format!("a-{}", n),
            student_id: "s1".to_string(),
            decision: AuditDecision::Allowed,
            reasons: vec!["within_limits".to_string()],
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n),
        }
    }

    #[test]
    fn test_trail_is_bounded_and_chronological() {
        let config = PolicyConfig {
            max_audit_entries: 3,
            ..Default::default()
        };
        let policies =
            AlertPolicies::with_config(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        for n in 0..5 {
            policies.append_audit(entry(n));
        }

        let ids: Vec<String> = policies
            .get_audit_trail("s1", 10)
            .into_iter()
            .map(|e| e.alert_id)
            .collect();
        assert_eq!(ids, vec!["a-2", "a-3", "a-4"]);

        let latest = policies.get_audit_trail("s1", 1);
        assert_eq!(latest[0].alert_id, "a-4");
        assert!(policies.get_audit_trail("s1", 0).is_empty());
    }

    #[test]
    fn test_export_is_json_array() {
        let policies = AlertPolicies::in_memory();
        assert_eq!(policies.export_audit_trail("nobody", 10), "[]");

        policies.append_audit(entry(1));
        let exported = policies.export_audit_trail("s1", 10);
        let parsed: Vec<AuditTrailEntry> = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed, vec![entry(1)]);
        assert!(exported.contains("\"decision\": \"allowed\""));
    }
}
