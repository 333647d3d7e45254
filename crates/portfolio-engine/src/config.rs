use crate::allocation::TargetPolicy;
use crate::beta::MIN_BETA_SAMPLES;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Currency handling
    pub reporting_currency: String,        // EUR
    pub foreign_currency: String,          // USD, the one currency converted per analysis
    pub fx_fallback_rate: f64,             // used until a rate has been fetched once

    // Beta estimation
    pub benchmark_symbol: String,          // SPY
    pub benchmark_ttl_hours: i64,          // 24
    pub beta_ttl_days: i64,                // 7
    pub beta_lookback_months: u32,         // 60
    pub beta_min_samples: usize,           // 18

    // Enrichment throttling
    pub enrich_concurrency: usize,         // 1 = sequential
    pub enrich_pause_ms: u64,              // 250

    // Allocation
    pub target_policy: TargetPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reporting_currency: "EUR".to_string(),
            foreign_currency: "USD".to_string(),
            fx_fallback_rate: 1.0,
            benchmark_symbol: "SPY".to_string(),
            benchmark_ttl_hours: 24,
            beta_ttl_days: 7,
            beta_lookback_months: 60,
            beta_min_samples: MIN_BETA_SAMPLES,
            enrich_concurrency: 1,
            enrich_pause_ms: 250,
            target_policy: TargetPolicy::Normalize,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            reporting_currency: lookup("PORTFOLIO_REPORTING_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.reporting_currency),
            foreign_currency: lookup("PORTFOLIO_FOREIGN_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.foreign_currency),
            fx_fallback_rate: parse_or(&lookup, "PORTFOLIO_FX_FALLBACK_RATE", defaults.fx_fallback_rate)?,
            benchmark_symbol: lookup("PORTFOLIO_BENCHMARK_SYMBOL")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.benchmark_symbol),
            benchmark_ttl_hours: parse_or(&lookup, "PORTFOLIO_BENCHMARK_TTL_HOURS", defaults.benchmark_ttl_hours)?,
            beta_ttl_days: parse_or(&lookup, "PORTFOLIO_BETA_TTL_DAYS", defaults.beta_ttl_days)?,
            beta_lookback_months: parse_or(&lookup, "PORTFOLIO_BETA_LOOKBACK_MONTHS", defaults.beta_lookback_months)?,
            beta_min_samples: parse_or(&lookup, "PORTFOLIO_BETA_MIN_SAMPLES", defaults.beta_min_samples)?,
            enrich_concurrency: parse_or(&lookup, "PORTFOLIO_ENRICH_CONCURRENCY", defaults.enrich_concurrency)?,
            enrich_pause_ms: parse_or(&lookup, "PORTFOLIO_ENRICH_PAUSE_MS", defaults.enrich_pause_ms)?,
            target_policy: match lookup("PORTFOLIO_TARGET_POLICY") {
                Some(raw) => raw
                    .parse()
                    .context("PORTFOLIO_TARGET_POLICY must be 'normalize' or 'strict'")?,
                None => defaults.target_policy,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.reporting_currency.is_empty(), "reporting currency must not be empty");
        ensure!(!self.foreign_currency.is_empty(), "foreign currency must not be empty");
        ensure!(
            self.fx_fallback_rate.is_finite() && self.fx_fallback_rate > 0.0,
            "FX fallback rate must be positive, got {}",
            self.fx_fallback_rate
        );
        ensure!(!self.benchmark_symbol.is_empty(), "benchmark symbol must not be empty");
        ensure!(self.benchmark_ttl_hours > 0, "benchmark TTL must be positive");
        ensure!(self.beta_ttl_days > 0, "beta TTL must be positive");
        ensure!(
            self.beta_min_samples >= 2,
            "beta needs at least 2 samples, got {}",
            self.beta_min_samples
        );
        ensure!(
            self.beta_lookback_months as usize > self.beta_min_samples,
            "lookback of {} months cannot yield {} monthly returns",
            self.beta_lookback_months,
            self.beta_min_samples
        );
        ensure!(self.enrich_concurrency >= 1, "enrichment concurrency must be at least 1");
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.reporting_currency, "EUR");
        assert_eq!(config.benchmark_symbol, "SPY");
        assert_eq!(config.beta_min_samples, 18);
        assert_eq!(config.target_policy, TargetPolicy::Normalize);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("PORTFOLIO_REPORTING_CURRENCY", "gbp"),
            ("PORTFOLIO_BENCHMARK_SYMBOL", "vt"),
            ("PORTFOLIO_ENRICH_CONCURRENCY", "4"),
            ("PORTFOLIO_TARGET_POLICY", "strict"),
        ]))
        .unwrap();
        assert_eq!(config.reporting_currency, "GBP");
        assert_eq!(config.benchmark_symbol, "VT");
        assert_eq!(config.enrich_concurrency, 4);
        assert_eq!(config.target_policy, TargetPolicy::Strict);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_lookup(lookup_from(&[("PORTFOLIO_BETA_TTL_DAYS", "soon")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("PORTFOLIO_FX_FALLBACK_RATE", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("PORTFOLIO_TARGET_POLICY", "loose")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("PORTFOLIO_ENRICH_CONCURRENCY", "0")])).is_err());
    }
}
