//! Robust statistics primitives
//!
//! Pure functions used by the baseline service: median/MAD/IQR for outlier
//! resistant location and spread, Huber-weighted regression for robust trends,
//! a beta-binomial posterior for sparse rates (backed by `statrs`), and Pearson
//! correlation.
//! Non-finite inputs are ignored rather than propagated.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

/// Consistency constant making MAD comparable to a normal standard deviation
pub const MAD_SCALE: f64 = 1.4826;

/// Tuning constant for Huber weights (95% efficiency under normality)
pub const HUBER_K: f64 = 1.345;

/// Two-sided 95% normal quantile
pub const Z_95: f64 = 1.959964;

/// Asymptotic efficiency factor of the median relative to the mean (sqrt(pi/2))
const MEDIAN_SE_FACTOR: f64 = 1.2533;

const HUBER_MAX_ITERATIONS: usize = 50;
const HUBER_TOLERANCE: f64 = 1e-9;

// Beyond this the inverse CDF loses precision
const LARGE_PARAMETER: f64 = 1e6;

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Arithmetic mean of the finite values
pub fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Median of the finite values
pub fn median(values: &[f64]) -> Option<f64> {
    median_of_sorted(&finite_sorted(values))
}

fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Quantile with linear interpolation between order statistics, `q` in [0, 1]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let sorted = finite_sorted(values);
    if sorted.is_empty() || !q.is_finite() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Interquartile range (Q3 - Q1)
pub fn iqr(values: &[f64]) -> Option<f64> {
    Some(quantile(values, 0.75)? - quantile(values, 0.25)?)
}

/// Raw median absolute deviation around the median
pub fn mad(values: &[f64]) -> Option<f64> {
    let sorted = finite_sorted(values);
    let center = median_of_sorted(&sorted)?;
    let deviations: Vec<f64> = sorted.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// MAD scaled to estimate a normal standard deviation
pub fn scaled_mad(values: &[f64]) -> Option<f64> {
    mad(values).map(|m| m * MAD_SCALE)
}

/// Normal-approximation confidence interval for a sample median.
///
/// Uses the asymptotic standard error `1.2533 * sigma / sqrt(n)` with a robust
/// sigma estimate. Returns a degenerate interval at the median for `n == 0`.
pub fn median_confidence_interval(median: f64, robust_sigma: f64, n: usize, z: f64) -> (f64, f64) {
    if n == 0 || !robust_sigma.is_finite() {
        return (median, median);
    }
    let half_width = z * MEDIAN_SE_FACTOR * robust_sigma / (n as f64).sqrt();
    (median - half_width, median + half_width)
}

/// Pearson correlation coefficient; `None` for fewer than 3 pairs or zero variance
pub fn pearson_correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 3 {
        return None;
    }

    let n = pairs.len() as f64;
    let x_mean = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in &pairs {
        let dx = x - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Straight line `y = intercept + slope * x`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

fn weighted_fit(xs: &[f64], ys: &[f64], weights: &[f64]) -> Option<LinearFit> {
    let sw: f64 = weights.iter().sum();
    if sw <= 0.0 {
        return None;
    }
    let x_mean = xs.iter().zip(weights).map(|(x, w)| x * w).sum::<f64>() / sw;
    let y_mean = ys.iter().zip(weights).map(|(y, w)| y * w).sum::<f64>() / sw;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for ((x, y), w) in xs.iter().zip(ys).zip(weights) {
        sxx += w * (x - x_mean) * (x - x_mean);
        sxy += w * (x - x_mean) * (y - y_mean);
    }
    if sxx <= f64::EPSILON {
        return None;
    }

    let slope = sxy / sxx;
    Some(LinearFit {
        slope,
        intercept: y_mean - slope * x_mean,
    })
}

/// Huber-weighted linear regression via iteratively reweighted least squares.
///
/// Residuals are scaled by the MAD of the current residuals; points beyond
/// `HUBER_K` scaled units get weight `k / |r|`. Returns `None` for fewer than
/// 3 points or when `x` has no spread.
pub fn huber_regression(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xs.len() < 3 {
        return None;
    }

    let mut weights = vec![1.0; xs.len()];
    let mut fit = weighted_fit(&xs, &ys, &weights)?;

    for _ in 0..HUBER_MAX_ITERATIONS {
        let residuals: Vec<f64> = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| y - fit.predict(*x))
            .collect();
        let scale = match scaled_mad(&residuals) {
            Some(s) if s > 1e-12 => s,
            _ => break,
        };

        for (w, r) in weights.iter_mut().zip(&residuals) {
            let u = (r / scale).abs();
            *w = if u <= HUBER_K { 1.0 } else { HUBER_K / u };
        }

        let next = weighted_fit(&xs, &ys, &weights)?;
        let converged = (next.slope - fit.slope).abs() < HUBER_TOLERANCE
            && (next.intercept - fit.intercept).abs() < HUBER_TOLERANCE;
        fit = next;
        if converged {
            break;
        }
    }

    Some(fit)
}

/// Beta distribution used as a conjugate prior/posterior for Bernoulli rates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaDistribution {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaDistribution {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Posterior after observing `successes` out of `trials`
    pub fn update(&self, successes: u64, trials: u64) -> Self {
        let failures = trials.saturating_sub(successes);
        Self {
            alpha: self.alpha + successes as f64,
            beta: self.beta + failures as f64,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// `statrs` view of the parameters; `None` when they are not a valid Beta
    fn distribution(&self) -> Option<Beta> {
        Beta::new(self.alpha, self.beta).ok()
    }

    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }
        match self.distribution() {
            Some(dist) => dist.cdf(x),
            None => x,
        }
    }

    /// Inverse CDF, clamped to [0, 1]
    pub fn quantile(&self, p: f64) -> f64 {
        if p <= 0.0 {
            return 0.0;
        }
        if p >= 1.0 {
            return 1.0;
        }
        match self.distribution() {
            Some(dist) => {
                let q = dist.inverse_cdf(p);
                if q.is_finite() {
                    q.clamp(0.0, 1.0)
                } else {
                    self.mean()
                }
            }
            None => p,
        }
    }

    /// Equal-tailed credible interval at `level` (e.g. 0.95).
    ///
    /// Very large parameters collapse to a narrow band around the mean.
    pub fn credible_interval(&self, level: f64) -> (f64, f64) {
        if self.alpha > LARGE_PARAMETER || self.beta > LARGE_PARAMETER {
            let mean = self.mean();
            return ((mean - 1e-6).max(0.0), (mean + 1e-6).min(1.0));
        }
        let tail = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
        (self.quantile(tail), self.quantile(1.0 - tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even_and_empty() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[f64::NAN, 5.0]), Some(5.0));
    }

    #[test]
    fn test_median_resists_single_outlier() {
        let values = [3.0, 3.0, 4.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&values), Some(3.5));
        assert!(mean(&values).unwrap() > 19.0);
    }

    #[test]
    fn test_mad_and_iqr() {
        // deviations from median 3: 2,1,0,1,2 -> MAD 1
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mad(&values), Some(1.0));
        assert!((scaled_mad(&values).unwrap() - MAD_SCALE).abs() < 1e-12);
        assert_eq!(iqr(&values), Some(2.0));
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(5.0));
    }

    #[test]
    fn test_median_confidence_interval_narrows_with_samples() {
        let (lo_small, hi_small) = median_confidence_interval(3.0, 1.0, 4, Z_95);
        let (lo_large, hi_large) = median_confidence_interval(3.0, 1.0, 100, Z_95);
        assert!(hi_small - lo_small > hi_large - lo_large);
        assert!(lo_large < 3.0 && hi_large > 3.0);
        assert_eq!(median_confidence_interval(3.0, 1.0, 0, Z_95), (3.0, 3.0));
    }

    #[test]
    fn test_pearson_correlation() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson_correlation(&xs, &ys).unwrap() - 1.0).abs() < 1e-12);

        let inverse = [10.0, 8.0, 6.0, 4.0, 2.0];
        assert!((pearson_correlation(&xs, &inverse).unwrap() + 1.0).abs() < 1e-12);

        assert_eq!(pearson_correlation(&xs, &[1.0, 1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson_correlation(&[1.0, 2.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_huber_regression_ignores_outlier() {
        let xs: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let mut ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        ys[10] = 100.0;

        let ols = weighted_fit(&xs, &ys, &vec![1.0; xs.len()]).unwrap();
        let robust = huber_regression(&xs, &ys).unwrap();

        assert!(ols.slope > 4.0);
        assert!((robust.slope - 2.0).abs() < 0.1);
        assert!((robust.intercept - 1.0).abs() < 0.5);
    }

    #[test]
    fn test_huber_regression_degenerate_inputs() {
        assert_eq!(huber_regression(&[1.0, 2.0], &[1.0, 2.0]), None);
        assert_eq!(huber_regression(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_beta_invalid_parameters_fall_back() {
        let broken = BetaDistribution::new(0.0, -1.0);
        assert_eq!(broken.cdf(0.3), 0.3);
        assert_eq!(broken.quantile(0.25), 0.25);
        assert_eq!(broken.cdf(-1.0), 0.0);
        assert_eq!(broken.quantile(1.0), 1.0);
    }

    #[test]
    fn test_beta_large_counts_collapse_to_mean() {
        let posterior = BetaDistribution::new(1.0, 1.0).update(3_000_000, 4_000_000);
        let (lo, hi) = posterior.credible_interval(0.95);
        assert!(lo < posterior.mean() && posterior.mean() < hi);
        assert!(hi - lo < 1e-5);
    }

    #[test]
    fn test_beta_uniform_quantiles() {
        let uniform = BetaDistribution::new(1.0, 1.0);
        assert!((uniform.cdf(0.3) - 0.3).abs() < 1e-6);
        let (lo, hi) = uniform.credible_interval(0.95);
        assert!((lo - 0.025).abs() < 1e-4);
        assert!((hi - 0.975).abs() < 1e-4);
    }

    #[test]
    fn test_beta_posterior_shrinks_sparse_rates() {
        // 2 of 2 observed: raw rate would be 100%
        let posterior = BetaDistribution::new(1.0, 1.0).update(2, 2);
        assert_eq!(posterior, BetaDistribution::new(3.0, 1.0));
        assert!((posterior.mean() - 0.75).abs() < 1e-12);

        let (lo, hi) = posterior.credible_interval(0.95);
        assert!(lo > 0.0 && hi < 1.0);
        assert!(lo < posterior.mean() && posterior.mean() < hi);
    }

    #[test]
    fn test_beta_symmetric_interval() {
        let posterior = BetaDistribution::new(5.0, 5.0);
        let (lo, hi) = posterior.credible_interval(0.9);
        assert!((lo + hi - 1.0).abs() < 1e-4);
    }
}
