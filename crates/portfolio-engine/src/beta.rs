//! Systematic risk (beta) of a security against a broad-market benchmark.
//!
//! `BetaEngine` is the pure regression. `BetaService` wraps it with the market data
//! provider and two TTL caches: the benchmark series (shared by every security, short
//! lifetime) and the computed beta per security (long lifetime).

use crate::cache::{Clock, TtlCache};
use crate::config::EngineConfig;
use crate::shared_math;
use chrono::{Datelike, Duration};
use portfolio_core::{BetaResult, EngineError, MarketDataProvider, PricePoint};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fewest aligned monthly returns for a statistically meaningful estimate.
pub const MIN_BETA_SAMPLES: usize = 18;

#[derive(Debug, Clone, Copy)]
pub struct BetaEngine {
    min_samples: usize,
}

impl Default for BetaEngine {
    fn default() -> Self {
        Self {
            min_samples: MIN_BETA_SAMPLES,
        }
    }
}

impl BetaEngine {
    pub fn new(min_samples: usize) -> Self {
        // Sample covariance needs at least two observations
        Self {
            min_samples: min_samples.max(2),
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Beta = Cov(security, benchmark) / Var(benchmark) over periodic returns.
    ///
    /// Series of different length are aligned on their most recent observations.
    /// Below the minimum sample size, or when the benchmark has no variance, the
    /// neutral default is returned with `is_calculated = false`.
    pub fn compute_beta(&self, security_returns: &[f64], benchmark_returns: &[f64]) -> BetaResult {
        let n = security_returns.len().min(benchmark_returns.len());
        let sec = &security_returns[security_returns.len() - n..];
        let bench = &benchmark_returns[benchmark_returns.len() - n..];

        if n < self.min_samples {
            return BetaResult::fallback(n);
        }

        match shared_math::regress(sec, bench) {
            Some(reg) if reg.beta.is_finite() => BetaResult {
                beta: reg.beta,
                sample_size: n,
                is_calculated: true,
                alpha: reg.alpha,
                r_squared: reg.r_squared,
            },
            _ => {
                tracing::warn!("Benchmark returns have no variance over {} samples; using default beta", n);
                BetaResult::fallback(n)
            }
        }
    }

    /// Beta from two price histories, aligned to shared calendar months first.
    pub fn beta_from_prices(&self, security: &[PricePoint], benchmark: &[PricePoint]) -> BetaResult {
        let (sec_closes, bench_closes) = align_monthly_closes(security, benchmark);
        let (sec_returns, bench_returns) = shared_math::aligned_returns(&sec_closes, &bench_closes);
        self.compute_beta(&sec_returns, &bench_returns)
    }
}

/// Reduce both series to the last close of each calendar month and keep only the
/// months present in both. Output is chronological.
pub fn align_monthly_closes(security: &[PricePoint], benchmark: &[PricePoint]) -> (Vec<f64>, Vec<f64>) {
    let sec = last_close_per_month(security);
    let bench = last_close_per_month(benchmark);

    sec.iter()
        .filter_map(|(month, &close)| bench.get(month).map(|&b| (close, b)))
        .unzip()
}

fn last_close_per_month(points: &[PricePoint]) -> BTreeMap<(i32, u32), f64> {
    let mut sorted: Vec<&PricePoint> = points
        .iter()
        .filter(|p| p.close.is_finite() && p.close > 0.0)
        .collect();
    sorted.sort_by_key(|p| p.date);

    let mut months = BTreeMap::new();
    for p in sorted {
        months.insert((p.date.year(), p.date.month()), p.close);
    }
    months
}

/// Cached beta lookups against the configured benchmark.
pub struct BetaService {
    provider: Arc<dyn MarketDataProvider>,
    engine: BetaEngine,
    benchmark_symbol: String,
    lookback_months: u32,
    benchmark_cache: TtlCache<Vec<PricePoint>>,
    beta_cache: TtlCache<BetaResult>,
}

impl BetaService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            engine: BetaEngine::new(config.beta_min_samples),
            benchmark_symbol: config.benchmark_symbol.clone(),
            lookback_months: config.beta_lookback_months,
            benchmark_cache: TtlCache::new(Duration::hours(config.benchmark_ttl_hours), clock.clone()),
            beta_cache: TtlCache::new(Duration::days(config.beta_ttl_days), clock),
        }
    }

    /// Beta for `symbol`, served from cache when fresh.
    pub async fn beta(&self, symbol: &str) -> Result<BetaResult, EngineError> {
        let key = symbol.trim().to_uppercase();
        if let Some(cached) = self.beta_cache.get(&key) {
            return Ok(cached);
        }

        let benchmark = self.benchmark_series().await?;
        let history = self
            .provider
            .historical_closes(&key, self.lookback_months)
            .await?;

        let result = self.engine.beta_from_prices(&history, &benchmark);
        tracing::debug!(
            "Beta for {} vs {}: {:.3} (samples: {}, calculated: {})",
            key,
            self.benchmark_symbol,
            result.beta,
            result.sample_size,
            result.is_calculated
        );
        self.beta_cache.insert(key, result.clone());
        Ok(result)
    }

    /// Like [`BetaService::beta`], but any failure yields the neutral default.
    pub async fn beta_or_default(&self, symbol: &str) -> BetaResult {
        match self.beta(symbol).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Beta unavailable for {}: {}; using default", symbol, e);
                BetaResult::fallback(0)
            }
        }
    }

    async fn benchmark_series(&self) -> Result<Vec<PricePoint>, EngineError> {
        if let Some(series) = self.benchmark_cache.get(&self.benchmark_symbol) {
            return Ok(series);
        }

        let series = self
            .provider
            .historical_closes(&self.benchmark_symbol, self.lookback_months)
            .await?;
        if series.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "empty benchmark series for {}",
                self.benchmark_symbol
            )));
        }

        // Benchmark refresh doubles as the sweep for stale per-security betas
        let purged = self.beta_cache.purge_expired() + self.benchmark_cache.purge_expired();
        tracing::info!(
            "Refreshed benchmark {} ({} closes, {} stale cache entries dropped)",
            self.benchmark_symbol,
            series.len(),
            purged
        );
        self.benchmark_cache
            .insert(self.benchmark_symbol.clone(), series.clone());
        Ok(series)
    }
}
