//! Alert Governance - admission policies and robust baselines for behavioral alerts
//!
//! Decides, for a stream of candidate alerts, which ones a human actually sees,
//! when, and how often, and maintains the per-student statistical baselines that
//! detectors use to judge whether an observation is normal.
//!
//! ## Modules
//!
//! - **Policy engine** (`policy`): settings validation, quiet hours, deduplication,
//!   daily caps, severity-aware backoff, snooze, admission and audit trail
//! - **Baseline service** (`baseline`): median/MAD emotion baselines, beta-binomial
//!   sensory rates, environment correlation
//! - **Pipeline** (`pipeline`): end-to-end governance of a candidate batch
//!
//! All state goes through a namespaced [`storage::KeyValueStore`] and all time
//! reads through an injected [`clock::Clock`].

pub mod baseline;
pub mod clock;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod stats;
pub mod storage;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::{Baseline, BaselineConfig, BaselineInput, BaselineService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GovernanceError, StorageError, ValidationError};
pub use pipeline::{govern_alerts_json, AlertGovernor, GovernanceReport, SuppressedAlert};
pub use policy::{AlertPolicies, PolicyConfig, SettingsValidation, UNBOUNDED_CAP};
pub use storage::{FileStore, KeyValueStore, MemoryStore, NamespacedStore};
pub use types::{
    AdmissionDecision, AlertEvent, AlertKind, AlertSettings, AlertStatus, AuditDecision,
    AuditTrailEntry, Governance, QuietHours, Severity, ThrottleCheck, ThrottleSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Combined engine configuration, as loaded by the CLI from a JSON file
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub policy: PolicyConfig,
    pub baseline: BaselineConfig,
}

impl GovernanceConfig {
    pub fn from_json(json: &str) -> Result<Self, GovernanceError> {
        Ok(serde_json::from_str(json)?)
    }
}
