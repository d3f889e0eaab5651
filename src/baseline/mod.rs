//! Baseline service
//!
//! Turns a student's raw emotion, sensory and tracking history into robust
//! per-window reference statistics and persists the snapshot. Baselines are
//! recomputed from the full history on every update; windows are measured
//! backwards from the injected clock.

pub mod estimators;
pub mod types;

pub use types::{
    baseline_key, Baseline, BaselineInput, EmotionBaseline, EmotionEntry, EnvironmentBaseline,
    EnvironmentalConditions, Interval, SampleInfo, SensoryBaseline, SensoryEntry, TrackingEntry,
};

use crate::clock::{Clock, SystemClock};
use crate::stats::BetaDistribution;
use crate::storage::{KeyValueStore, MemoryStore, NamespacedStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Default windows in days
pub const DEFAULT_WINDOWS_DAYS: [u32; 3] = [7, 14, 30];

pub const DEFAULT_NAMESPACE: &str = "baselines";

/// Baseline computation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub namespace: String,
    pub windows_days: Vec<u32>,
    /// Windows with fewer samples are omitted
    pub min_samples_per_window: usize,
    /// Below this many entries overall no baseline is produced
    pub min_total_points: usize,
    /// Sample count considered fully adequate for quality scoring
    pub target_samples: usize,
    pub prior_alpha: f64,
    pub prior_beta: f64,
    pub credible_level: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            windows_days: DEFAULT_WINDOWS_DAYS.to_vec(),
            min_samples_per_window: 3,
            min_total_points: 5,
            target_samples: 20,
            prior_alpha: 1.0,
            prior_beta: 1.0,
            credible_level: 0.95,
        }
    }
}

impl BaselineConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Rate prior; non-positive parameters fall back to the uniform prior
    pub fn prior(&self) -> BetaDistribution {
        let valid = |p: f64| p.is_finite() && p > 0.0;
        if valid(self.prior_alpha) && valid(self.prior_beta) {
            BetaDistribution::new(self.prior_alpha, self.prior_beta)
        } else {
            BetaDistribution::new(1.0, 1.0)
        }
    }

    pub fn effective_credible_level(&self) -> f64 {
        if self.credible_level > 0.0 && self.credible_level < 1.0 {
            self.credible_level
        } else {
            0.95
        }
    }
}

fn normalize_label(label: &str) -> Option<String> {
    let label = label.trim().to_lowercase();
    (!label.is_empty()).then_some(label)
}

/// Computes and persists per-student baselines
pub struct BaselineService {
    config: BaselineConfig,
    state: NamespacedStore,
    clock: Arc<dyn Clock>,
}

impl BaselineService {
    pub fn new(config: BaselineConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let state = NamespacedStore::new(config.namespace.clone(), store);
        Self {
            config,
            state,
            clock,
        }
    }

    /// Service over a private in-memory store and the wall clock
    pub fn in_memory() -> Self {
        Self::new(
            BaselineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Whether a persistence read or write has failed
    pub fn storage_degraded(&self) -> bool {
        self.state.is_degraded()
    }

    fn baseline_storage_key(&self, student_id: &str) -> String {
        self.state.key(&["baseline", student_id])
    }

    /// Recompute the student's baseline from `input` and persist it.
    ///
    /// Returns `None` when there is not enough data: fewer than
    /// `min_total_points` entries overall, or no window of any factor reaching
    /// `min_samples_per_window`. Entries for other students are ignored.
    pub fn update_baseline(&self, input: &BaselineInput) -> Option<Baseline> {
        let student_id = input.student_id.as_str();
        let emotions: Vec<&EmotionEntry> = input
            .emotions
            .iter()
            .filter(|e| e.student_id == student_id)
            .collect();
        let sensory: Vec<&SensoryEntry> = input
            .sensory
            .iter()
            .filter(|e| e.student_id == student_id)
            .collect();
        let tracking: Vec<&TrackingEntry> = input
            .tracking
            .iter()
            .filter(|e| e.student_id == student_id)
            .collect();

        let foreign = input.emotions.len() + input.sensory.len() + input.tracking.len()
            - emotions.len()
            - sensory.len()
            - tracking.len();
        if foreign > 0 {
            tracing::warn!(student_id, foreign, "ignoring entries belonging to other students");
        }

        let total = emotions.len() + sensory.len() + tracking.len();
        if total < self.config.min_total_points {
            tracing::debug!(student_id, total, "not enough data for a baseline");
            return None;
        }

        let now = self.clock.now();
        let min = self.config.min_samples_per_window;
        let mut emotion_stats = BTreeMap::new();
        let mut sensory_stats = BTreeMap::new();
        let mut environment_stats = BTreeMap::new();

        let categories: BTreeSet<String> = sensory
            .iter()
            .filter_map(|e| normalize_label(&e.response))
            .collect();

        for &days in &self.config.windows_days {
            let since = now
                .checked_sub_signed(Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            let mut by_label: BTreeMap<String, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
            for entry in emotions.iter().filter(|e| e.timestamp >= since) {
                if let Some(label) = normalize_label(&entry.emotion) {
                    by_label
                        .entry(label)
                        .or_default()
                        .push((entry.timestamp, entry.intensity));
                }
            }
            for (label, samples) in by_label {
                if let Some(stats) = estimators::emotion_window(&samples, days, min) {
                    emotion_stats.insert(baseline_key(&label, days), stats);
                }
            }

            let in_window: Vec<&&SensoryEntry> = sensory.iter().filter(|e| e.timestamp >= since).collect();
            let trials = in_window.len() as u64;
            if !in_window.is_empty() && in_window.len() >= min {
                for category in &categories {
                    let successes = in_window
                        .iter()
                        .filter(|e| normalize_label(&e.response).as_deref() == Some(category.as_str()))
                        .count() as u64;
                    let stats = estimators::sensory_window(
                        successes,
                        trials,
                        days,
                        self.config.prior(),
                        self.config.effective_credible_level(),
                    );
                    sensory_stats.insert(baseline_key(category, days), stats);
                }
            }

            let mut by_factor: BTreeMap<&'static str, Vec<(f64, Option<f64>)>> = BTreeMap::new();
            for session in tracking.iter().filter(|t| t.timestamp >= since) {
                let Some(environment) = &session.environment else {
                    continue;
                };
                let emotion = session.mean_emotion_intensity();
                for (factor, value) in environment.factors() {
                    by_factor.entry(factor).or_default().push((value, emotion));
                }
            }
            for (factor, readings) in by_factor {
                if let Some(stats) = estimators::environment_window(&readings, days, min) {
                    environment_stats.insert(baseline_key(factor, days), stats);
                }
            }
        }

        let counts: Vec<usize> = emotion_stats
            .values()
            .map(|s| s.sample_count)
            .chain(sensory_stats.values().map(|s| s.trials as usize))
            .chain(environment_stats.values().map(|s| s.sample_count))
            .collect();
        if counts.is_empty() {
            tracing::debug!(student_id, total, "no window reached the minimum sample count");
            return None;
        }
        let quality = counts
            .iter()
            .map(|&n| estimators::adequacy(n, self.config.target_samples))
            .sum::<f64>()
            / counts.len() as f64;

        let timestamps = emotions
            .iter()
            .map(|e| e.timestamp)
            .chain(sensory.iter().map(|e| e.timestamp))
            .chain(tracking.iter().map(|t| t.timestamp));
        let (first_observed, last_observed) = timestamps.fold((None, None), |(lo, hi), t| {
            (
                Some(lo.map_or(t, |lo: DateTime<Utc>| lo.min(t))),
                Some(hi.map_or(t, |hi: DateTime<Utc>| hi.max(t))),
            )
        });

        let version = self.get_baseline(student_id).map_or(0, |b| b.version) + 1;
        let baseline = Baseline {
            student_id: student_id.to_string(),
            version,
            computed_at: now,
            emotion: emotion_stats,
            sensory: sensory_stats,
            environment: environment_stats,
            quality,
            sample_info: SampleInfo {
                sessions: tracking.len(),
                emotion_samples: emotions.len(),
                sensory_samples: sensory.len(),
                first_observed,
                last_observed,
            },
        };

        self.state.save(&self.baseline_storage_key(student_id), &baseline);
        tracing::debug!(student_id, version, quality, "baseline updated");
        Some(baseline)
    }

    /// Last persisted snapshot, without recomputation
    pub fn get_baseline(&self, student_id: &str) -> Option<Baseline> {
        self.state.load(&self.baseline_storage_key(student_id))
    }

    pub fn get_emotion_baseline(&self, student_id: &str) -> Option<BTreeMap<String, EmotionBaseline>> {
        self.get_baseline(student_id).map(|b| b.emotion)
    }

    pub fn get_sensory_baseline(&self, student_id: &str) -> Option<BTreeMap<String, SensoryBaseline>> {
        self.get_baseline(student_id).map(|b| b.sensory)
    }

    pub fn get_environment_baseline(
        &self,
        student_id: &str,
    ) -> Option<BTreeMap<String, EnvironmentBaseline>> {
        self.get_baseline(student_id).map(|b| b.environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 18, 0, 0).unwrap()
    }

    fn service() -> BaselineService {
        BaselineService::new(
            BaselineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(now())),
        )
    }

    fn emotion(student: &str, label: &str, intensity: f64, days_ago: i64) -> EmotionEntry {
        EmotionEntry {
            id: None,
            student_id: student.to_string(),
            emotion: label.to_string(),
            intensity,
            timestamp: now() - Duration::days(days_ago),
        }
    }

    fn sensory(response: &str, days_ago: i64) -> SensoryEntry {
        SensoryEntry {
            id: None,
            student_id: "s1".to_string(),
            sensory_type: "auditory".to_string(),
            response: response.to_string(),
            intensity: None,
            timestamp: now() - Duration::days(days_ago),
        }
    }

    fn session(noise: f64, emotion_intensity: f64, days_ago: i64) -> TrackingEntry {
        TrackingEntry {
            id: None,
            student_id: "s1".to_string(),
            timestamp: now() - Duration::days(days_ago),
            emotions: vec![emotion("s1", "anxious", emotion_intensity, days_ago)],
            sensory: vec![],
            environment: Some(EnvironmentalConditions {
                noise_level: Some(noise),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_empty_history_yields_none() {
        let service = service();
        assert!(service.update_baseline(&BaselineInput::new("s1")).is_none());
        assert!(service.get_baseline("s1").is_none());
    }

    #[test]
    fn test_sparse_windows_yield_none() {
        // Enough entries overall, but no label reaches three samples
        let service = service();
        let mut input = BaselineInput::new("s1");
        for (i, label) in ["happy", "sad", "calm", "anxious", "angry"].iter().enumerate() {
            input.emotions.push(emotion("s1", label, 3.0, i as i64));
        }
        assert!(service.update_baseline(&input).is_none());
    }

    #[test]
    fn test_emotion_windows() {
        let service = service();
        let mut input = BaselineInput::new("s1");
        for d in 0..5 {
            input.emotions.push(emotion("s1", "Anxious", 4.0, d));
        }
        for d in 10..13 {
            input.emotions.push(emotion("s1", "anxious", 8.0, d));
        }

        let baseline = service.update_baseline(&input).unwrap();
        let week = baseline.emotion_for("anxious", 7).unwrap();
        assert_eq!(week.sample_count, 5);
        assert_eq!(week.median, 4.0);
        assert_eq!(baseline.emotion_for("anxious", 14).unwrap().sample_count, 8);
        assert_eq!(baseline.emotion_for("anxious", 30).unwrap().sample_count, 8);
        assert_eq!(baseline.version, 1);
        assert_eq!(baseline.sample_info.emotion_samples, 8);
        assert!(baseline.quality > 0.0 && baseline.quality <= 1.0);
    }

    #[test]
    fn test_sensory_rates_per_response() {
        let service = service();
        let mut input = BaselineInput::new("s1");
        for d in 0..4 {
            input.sensory.push(sensory("seeking", d));
        }
        input.sensory.push(sensory("avoiding", 1));

        let baseline = service.update_baseline(&input).unwrap();
        let seeking = baseline.sensory_for("seeking", 7).unwrap();
        assert_eq!((seeking.successes, seeking.trials), (4, 5));
        // Beta(1 + 4, 1 + 1)
        assert!((seeking.posterior_mean - 5.0 / 7.0).abs() < 1e-12);

        let avoiding = baseline.sensory_for("avoiding", 7).unwrap();
        assert_eq!((avoiding.successes, avoiding.trials), (1, 5));
    }

    #[test]
    fn test_environment_correlation_with_session_emotion() {
        let service = service();
        let mut input = BaselineInput::new("s1");
        for (i, noise) in [40.0, 50.0, 60.0, 70.0, 80.0].iter().enumerate() {
            input.tracking.push(session(*noise, *noise / 10.0, i as i64));
        }

        let baseline = service.update_baseline(&input).unwrap();
        let noise = baseline.environment_for("noise_level", 7).unwrap();
        assert_eq!(noise.sample_count, 5);
        assert_eq!(noise.median, 60.0);
        assert!(noise.correlation_with_emotion.unwrap() > 0.99);
        assert_eq!(baseline.sample_info.sessions, 5);
    }

    #[test]
    fn test_other_students_entries_are_ignored() {
        let service = service();
        let mut input = BaselineInput::new("s1");
        for d in 0..3 {
            input.emotions.push(emotion("s1", "calm", 2.0, d));
        }
        for d in 0..10 {
            input.emotions.push(emotion("s2", "calm", 9.0, d));
        }

        // Only three own entries: below the five-point minimum
        assert!(service.update_baseline(&input).is_none());
    }

    #[test]
    fn test_versions_increase_and_getters_read_snapshot() {
        let service = service();
        let mut input = BaselineInput::new("s1");
        for d in 0..6 {
            input.emotions.push(emotion("s1", "calm", 2.0, d));
        }

        assert_eq!(service.update_baseline(&input).unwrap().version, 1);
        assert_eq!(service.update_baseline(&input).unwrap().version, 2);

        let emotions = service.get_emotion_baseline("s1").unwrap();
        assert!(emotions.contains_key("calm:7"));
        assert!(service.get_sensory_baseline("s1").unwrap().is_empty());
        assert!(service.get_environment_baseline("s1").unwrap().is_empty());
        assert!(service.get_emotion_baseline("nobody").is_none());
    }

    #[test]
    fn test_config_fallbacks() {
        let config = BaselineConfig {
            prior_alpha: -1.0,
            credible_level: 1.5,
            ..Default::default()
        };
        assert_eq!(config.prior(), BetaDistribution::new(1.0, 1.0));
        assert_eq!(config.effective_credible_level(), 0.95);
    }
}
