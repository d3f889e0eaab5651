//! Per-window estimators
//!
//! Each function summarizes the observations of one factor within one window,
//! or returns `None` when the window holds fewer than the required samples.

use super::types::{EmotionBaseline, EnvironmentBaseline, Interval, SensoryBaseline};
use crate::stats::{
    huber_regression, iqr, median, median_confidence_interval, pearson_correlation, scaled_mad,
    BetaDistribution, Z_95,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Minimum distinct timestamps for a trend line
pub const MIN_TREND_POINTS: usize = 3;

/// Sample adequacy in [0, 1] relative to `target`
pub fn adequacy(sample_count: usize, target: usize) -> f64 {
    if target == 0 {
        return 1.0;
    }
    (sample_count as f64 / target as f64).min(1.0)
}

/// Median, scaled MAD, IQR, median CI and Huber trend of intensity samples
pub fn emotion_window(
    samples: &[(DateTime<Utc>, f64)],
    window_days: u32,
    min_samples: usize,
) -> Option<EmotionBaseline> {
    let samples: Vec<(DateTime<Utc>, f64)> = samples
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();
    if samples.is_empty() || samples.len() < min_samples {
        return None;
    }

    let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
    let center = median(&values)?;
    let spread = scaled_mad(&values)?;
    let n = values.len();

    Some(EmotionBaseline {
        median: center,
        mad: spread,
        iqr: iqr(&values)?,
        window_days,
        confidence_interval: median_confidence_interval(center, spread, n, Z_95).into(),
        sample_count: n,
        trend_per_day: trend_per_day(&samples),
    })
}

fn trend_per_day(samples: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    let distinct: BTreeSet<DateTime<Utc>> = samples.iter().map(|(t, _)| *t).collect();
    if distinct.len() < MIN_TREND_POINTS {
        return None;
    }
    let origin = *distinct.iter().next()?;

    let (xs, ys): (Vec<f64>, Vec<f64>) = samples
        .iter()
        .map(|(t, v)| ((*t - origin).num_milliseconds() as f64 / MS_PER_DAY, *v))
        .unzip();
    huber_regression(&xs, &ys).map(|fit| fit.slope)
}

/// Beta-binomial posterior for `successes` out of `trials`
pub fn sensory_window(
    successes: u64,
    trials: u64,
    window_days: u32,
    prior: BetaDistribution,
    credible_level: f64,
) -> SensoryBaseline {
    let posterior = prior.update(successes, trials);
    SensoryBaseline {
        rate_prior: prior,
        posterior_mean: posterior.mean(),
        credible_interval: posterior.credible_interval(credible_level).into(),
        successes,
        trials,
        window_days,
    }
}

/// Robust summary of factor readings, with the association between the factor
/// and each session's mean emotion intensity where one was recorded
pub fn environment_window(
    readings: &[(f64, Option<f64>)],
    window_days: u32,
    min_samples: usize,
) -> Option<EnvironmentBaseline> {
    let values: Vec<f64> = readings
        .iter()
        .map(|(v, _)| *v)
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() || values.len() < min_samples {
        return None;
    }

    let center = median(&values)?;
    let spread = scaled_mad(&values)?;
    let n = values.len();

    let (factor, emotion): (Vec<f64>, Vec<f64>) = readings
        .iter()
        .filter_map(|(v, e)| e.map(|e| (*v, e)))
        .unzip();

    Some(EnvironmentBaseline {
        median: center,
        mad: spread,
        confidence_interval: Interval::from(median_confidence_interval(center, spread, n, Z_95)),
        correlation_with_emotion: pearson_correlation(&factor, &emotion),
        emotion_slope: huber_regression(&factor, &emotion).map(|fit| fit.slope),
        sample_count: n,
        window_days,
    })
}
