//! Core alert types
//!
//! This module defines the data structures that flow through the policy engine:
//! candidate alerts, their governance annotation, per-student settings, and the
//! persisted audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Metadata entry grouping conceptually identical recurring alerts
pub const CONTEXT_KEY_FIELD: &str = "contextKey";

/// Alert severity, ordered `Low < Moderate < Important < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    Important,
    Critical,
}

impl Severity {
    /// All severities, most urgent first
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::Important,
        Severity::Moderate,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Moderate => "moderate",
            Severity::Low => "low",
        }
    }

    /// Backoff multiplier; more urgent alerts recover faster
    pub fn throttle_factor(&self) -> f64 {
        match self {
            Severity::Critical => 0.5,
            Severity::Important => 1.0,
            Severity::Moderate => 2.0,
            Severity::Low => 4.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of candidate alert produced by a detector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BehaviorSpike,
    EmotionPattern,
    ContextAssociation,
    Safety,
    InterventionDue,
    DataQuality,
    /// For detector kinds this crate does not know about
    #[serde(untagged)]
    Other(String),
}

impl AlertKind {
    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::BehaviorSpike => "behavior_spike",
            AlertKind::EmotionPattern => "emotion_pattern",
            AlertKind::ContextAssociation => "context_association",
            AlertKind::Safety => "safety",
            AlertKind::InterventionDue => "intervention_due",
            AlertKind::DataQuality => "data_quality",
            AlertKind::Other(name) => name.as_str(),
        }
    }
}

/// Lifecycle status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    New,
    Acknowledged,
    Resolved,
    Snoozed,
}

/// Provenance of a candidate alert; opaque to the policy engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertSource {
    /// Detector that produced the alert (e.g. "ewma", "cusum")
    pub detector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Ids of raw entries that contributed
    #[serde(default)]
    pub entry_ids: Vec<String>,
}

/// Annotation attached by the policy engine explaining suppression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Governance {
    pub cap_exceeded: bool,
    pub throttled: bool,
    pub snoozed: bool,
    pub quiet_hours: bool,
}

impl Governance {
    /// Whether any suppressing condition fired
    pub fn is_blocked(&self) -> bool {
        self.cap_exceeded || self.throttled || self.snoozed || self.quiet_hours
    }
}

/// A single candidate notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub student_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub sources: Vec<AlertSource>,
    #[serde(default)]
    pub governance: Governance,
}

impl AlertEvent {
    /// Create a new alert with a fresh id; confidence is clamped to [0, 1]
    pub fn new(
        student_id: impl Into<String>,
        kind: AlertKind,
        severity: Severity,
        confidence: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            kind,
            severity,
            confidence,
            created_at,
            status: AlertStatus::New,
            metadata: serde_json::Map::new(),
            sources: Vec::new(),
            governance: Governance::default(),
        }
    }

    /// Builder-style setter for the deduplication context
    pub fn with_context_key(mut self, context_key: impl Into<String>) -> Self {
        self.metadata.insert(
            CONTEXT_KEY_FIELD.to_string(),
            serde_json::Value::String(context_key.into()),
        );
        self
    }

    pub fn with_source(mut self, source: AlertSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Context key from metadata, if present and a string
    pub fn context_key(&self) -> Option<&str> {
        self.metadata.get(CONTEXT_KEY_FIELD).and_then(|v| v.as_str())
    }

    /// Deterministic grouping key for recurring situations
    pub fn dedupe_key(&self) -> String {
        crate::policy::calculate_dedupe_key(self)
    }

    pub fn acknowledge(&mut self) -> bool {
        self.transition(AlertStatus::Acknowledged)
    }

    pub fn resolve(&mut self) -> bool {
        self.transition(AlertStatus::Resolved)
    }

    pub fn mark_snoozed(&mut self) -> bool {
        self.transition(AlertStatus::Snoozed)
    }

    /// Apply a status transition; `Resolved` is terminal.
    /// Returns whether the status changed.
    fn transition(&mut self, to: AlertStatus) -> bool {
        if self.status == AlertStatus::Resolved || self.status == to {
            return false;
        }
        self.status = to;
        true
    }
}

/// Quiet-hours window as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"; earlier than `start` means the window crosses midnight
    pub end: String,
    /// Days the window applies on, 0 = Sunday; all days when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<i64>>,
}

/// Backoff tuning per severity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Upper bound on backoff delay in milliseconds
    #[serde(default)]
    pub max_delay_by_severity: BTreeMap<Severity, f64>,
}

/// Per-student alert configuration.
///
/// Caps are kept as `f64` so that malformed input survives deserialization and
/// can be repaired by normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub daily_caps: BTreeMap<Severity, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleSettings>,
}

/// Outcome of an admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Allowed,
    Denied,
}

/// One persisted record per admission decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub alert_id: String,
    pub student_id: String,
    pub decision: AuditDecision,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of `can_create_alert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub status: Governance,
}

/// Result of `should_throttle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleCheck {
    pub throttled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<DateTime<Utc>>,
}
