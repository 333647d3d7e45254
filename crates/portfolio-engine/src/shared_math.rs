//! Pure mathematical utilities shared by the allocation, beta and diversification code.
//! Stateless functions, no I/O.

use rust_decimal::prelude::*;
use statrs::statistics::Statistics;

/// Below this a denominator is treated as zero.
pub const EPSILON: f64 = 1e-12;

/// `part / total * 100`, or 0 when the total is zero.
pub fn percent_of(part: f64, total: f64) -> f64 {
    if total.abs() < EPSILON {
        0.0
    } else {
        part / total * 100.0
    }
}

/// Round half away from zero to `dp` decimal places for display.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Simple returns `p[i] / p[i-1] - 1` over two aligned price series.
/// A pair of observations is skipped when either series has a non-positive previous price,
/// so the returned vectors stay aligned and of equal length.
pub fn aligned_returns(security: &[f64], benchmark: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = security.len().min(benchmark.len());
    let mut sec_returns = Vec::with_capacity(n.saturating_sub(1));
    let mut bench_returns = Vec::with_capacity(n.saturating_sub(1));

    for i in 1..n {
        let (s0, s1) = (security[i - 1], security[i]);
        let (b0, b1) = (benchmark[i - 1], benchmark[i]);
        if s0 > 0.0 && b0 > 0.0 && s1.is_finite() && b1.is_finite() {
            sec_returns.push(s1 / s0 - 1.0);
            bench_returns.push(b1 / b0 - 1.0);
        }
    }

    (sec_returns, bench_returns)
}

/// Sample variance (n - 1 denominator). `None` below two observations.
pub fn sample_variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    Some(data.variance())
}

/// Sample covariance (n - 1 denominator). `None` for mismatched or short series.
pub fn sample_covariance(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    Some(x.covariance(y))
}

/// Regression of `y` on `x`: y = alpha + beta * x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub alpha: f64,
    pub beta: f64,
    pub r_squared: f64,
}

/// Beta as Cov(y, x) / Var(x) with sample estimators.
/// Returns `None` when the inputs are unusable or `x` has no variance.
pub fn regress(y: &[f64], x: &[f64]) -> Option<Regression> {
    let cov = sample_covariance(y, x)?;
    let var_x = sample_variance(x)?;
    let var_y = sample_variance(y)?;
    if !cov.is_finite() || !var_x.is_finite() || var_x < EPSILON {
        return None;
    }

    let beta = cov / var_x;
    let alpha = y.mean() - beta * x.mean();
    let r_squared = if var_y > EPSILON {
        (cov * cov) / (var_x * var_y)
    } else {
        0.0
    };

    Some(Regression {
        alpha,
        beta,
        r_squared,
    })
}

/// Herfindahl index from weights (0-1 scale). Higher = more concentrated.
pub fn herfindahl_index(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}
