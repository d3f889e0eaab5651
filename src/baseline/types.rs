//! Baseline input entries and persisted snapshot types

use crate::stats::BetaDistribution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single observed emotion with intensity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub student_id: String,
    pub emotion: String,
    pub intensity: f64,
    pub timestamp: DateTime<Utc>,
}

/// A single sensory observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub student_id: String,
    pub sensory_type: String,
    /// Response category, e.g. "seeking" or "avoiding"
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Environmental conditions recorded with a tracking session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalConditions {
    #[serde(default)]
    pub noise_level: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub light_level: Option<f64>,
    #[serde(default)]
    pub crowd_level: Option<f64>,
}

impl EnvironmentalConditions {
    /// Factor name and value for every finite reading
    pub fn factors(&self) -> Vec<(&'static str, f64)> {
        [
            ("noise_level", self.noise_level),
            ("temperature", self.temperature),
            ("light_level", self.light_level),
            ("crowd_level", self.crowd_level),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| v.is_finite()).map(|v| (name, v)))
        .collect()
    }
}

/// A tracking session bundling observations and the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub student_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub emotions: Vec<EmotionEntry>,
    #[serde(default)]
    pub sensory: Vec<SensoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentalConditions>,
}

impl TrackingEntry {
    /// Mean intensity of the session's emotions, if any are usable
    pub fn mean_emotion_intensity(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .emotions
            .iter()
            .map(|e| e.intensity)
            .filter(|v| v.is_finite())
            .collect();
        crate::stats::mean(&values)
    }
}

/// Full history for one student
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineInput {
    pub student_id: String,
    #[serde(default)]
    pub emotions: Vec<EmotionEntry>,
    #[serde(default)]
    pub sensory: Vec<SensoryEntry>,
    #[serde(default)]
    pub tracking: Vec<TrackingEntry>,
}

impl BaselineInput {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Closed interval `[lower, upper]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl From<(f64, f64)> for Interval {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

impl Interval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Robust emotion-intensity statistics for one label and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionBaseline {
    pub median: f64,
    /// MAD scaled to be comparable with a standard deviation
    pub mad: f64,
    pub iqr: f64,
    pub window_days: u32,
    pub confidence_interval: Interval,
    pub sample_count: usize,
    /// Huber slope of intensity per day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_per_day: Option<f64>,
}

/// Beta-binomial rate estimate for one response category and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensoryBaseline {
    pub rate_prior: BetaDistribution,
    pub posterior_mean: f64,
    pub credible_interval: Interval,
    pub successes: u64,
    pub trials: u64,
    pub window_days: u32,
}

/// Robust statistics for one environmental factor and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentBaseline {
    pub median: f64,
    pub mad: f64,
    pub confidence_interval: Interval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_with_emotion: Option<f64>,
    /// Huber slope of session emotion intensity on the factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_slope: Option<f64>,
    pub sample_count: usize,
    pub window_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub sessions: usize,
    pub emotion_samples: usize,
    pub sensory_samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_observed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed: Option<DateTime<Utc>>,
}

/// Versioned baseline snapshot for one student.
///
/// Statistic maps are keyed `"<factor>:<window days>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub student_id: String,
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub emotion: BTreeMap<String, EmotionBaseline>,
    #[serde(default)]
    pub sensory: BTreeMap<String, SensoryBaseline>,
    #[serde(default)]
    pub environment: BTreeMap<String, EnvironmentBaseline>,
    /// Mean sample adequacy in [0, 1]
    pub quality: f64,
    pub sample_info: SampleInfo,
}

/// Map key for a factor and window
pub fn baseline_key(factor: &str, window_days: u32) -> String {
    format!("{}:{}", factor, window_days)
}

impl Baseline {
    pub fn emotion_for(&self, emotion: &str, window_days: u32) -> Option<&EmotionBaseline> {
        self.emotion.get(&baseline_key(emotion, window_days))
    }

    pub fn sensory_for(&self, response: &str, window_days: u32) -> Option<&SensoryBaseline> {
        self.sensory.get(&baseline_key(response, window_days))
    }

    pub fn environment_for(&self, factor: &str, window_days: u32) -> Option<&EnvironmentBaseline> {
        self.environment.get(&baseline_key(factor, window_days))
    }

    pub fn is_empty(&self) -> bool {
        self.emotion.is_empty() && self.sensory.is_empty() && self.environment.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
