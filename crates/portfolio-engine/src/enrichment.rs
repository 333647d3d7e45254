use crate::beta::BetaService;
use dashmap::DashMap;
use portfolio_core::{
    BetaSource, EngineError, EngineResult, EnrichedHolding, FxRateSource, HybridHolding,
    MarketDataProvider, SectorClassifier,
};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Key used for override lookups.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Locally maintained name/sector correction for one security.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentOverrides {
    entries: HashMap<String, LocalOverride>,
}

impl EnrichmentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping symbols to `{ "name": ..., "sector": ... }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, LocalOverride> = serde_json::from_str(json)?;
        Ok(Self {
            entries: raw
                .into_iter()
                .map(|(symbol, entry)| (normalize_symbol(&symbol), entry))
                .collect(),
        })
    }

    pub fn insert(&mut self, symbol: &str, entry: LocalOverride) {
        self.entries.insert(normalize_symbol(symbol), entry);
    }

    pub fn get(&self, symbol: &str) -> Option<&LocalOverride> {
        self.entries.get(&normalize_symbol(symbol))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// FX lookups that never fail: a failed fetch falls back to the last rate seen for
/// the pair, then to the configured fallback rate.
pub struct FxRateCache {
    source: Arc<dyn FxRateSource>,
    last_known: DashMap<String, f64>,
    fallback_rate: f64,
}

impl FxRateCache {
    pub fn new(source: Arc<dyn FxRateSource>, fallback_rate: f64) -> Self {
        Self {
            source,
            last_known: DashMap::new(),
            fallback_rate,
        }
    }

    pub async fn rate(&self, from: &str, to: &str) -> f64 {
        let from = from.trim().to_uppercase();
        let to = to.trim().to_uppercase();
        if from == to {
            return 1.0;
        }

        let pair = format!("{}/{}", from, to);
        match self.source.rate(&from, &to).await {
            Ok(rate) if rate.is_finite() && rate > 0.0 => {
                self.last_known.insert(pair, rate);
                rate
            }
            Ok(rate) => {
                tracing::warn!("FX source returned unusable rate {} for {}", rate, pair);
                self.stale_rate(&pair)
            }
            Err(e) => {
                tracing::warn!("FX rate fetch failed for {}: {}", pair, e);
                self.stale_rate(&pair)
            }
        }
    }

    fn stale_rate(&self, pair: &str) -> f64 {
        match self.last_known.get(pair) {
            Some(rate) => {
                tracing::info!("Using last known {} rate {}", pair, *rate);
                *rate
            }
            None => {
                tracing::warn!("No known {} rate; using fallback {}", pair, self.fallback_rate);
                self.fallback_rate
            }
        }
    }
}

/// Turns a stored holding into an [`EnrichedHolding`] using the market data provider,
/// local overrides, the sector classifier and the beta service.
pub struct HoldingEnricher {
    provider: Arc<dyn MarketDataProvider>,
    beta_service: Arc<BetaService>,
    overrides: EnrichmentOverrides,
    classifier: Option<Arc<dyn SectorClassifier>>,
    reporting_currency: String,
    foreign_currency: String,
}

impl HoldingEnricher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        beta_service: Arc<BetaService>,
        reporting_currency: &str,
        foreign_currency: &str,
    ) -> Self {
        Self {
            provider,
            beta_service,
            overrides: EnrichmentOverrides::default(),
            classifier: None,
            reporting_currency: reporting_currency.trim().to_uppercase(),
            foreign_currency: foreign_currency.trim().to_uppercase(),
        }
    }

    pub fn set_overrides(&mut self, overrides: EnrichmentOverrides) {
        self.overrides = overrides;
    }

    pub fn set_classifier(&mut self, classifier: Arc<dyn SectorClassifier>) {
        self.classifier = Some(classifier);
    }

    /// Multiplier taking an amount in `currency` to the reporting currency.
    pub fn conversion_rate(&self, currency: &str, fx_rate: f64) -> EngineResult<f64> {
        let currency = currency.trim().to_uppercase();
        if currency == self.reporting_currency {
            Ok(1.0)
        } else if currency == self.foreign_currency {
            Ok(fx_rate)
        } else {
            Err(EngineError::UnsupportedCurrency {
                currency,
                reporting: self.reporting_currency.clone(),
            })
        }
    }

    pub async fn enrich(&self, holding: &HybridHolding, fx_rate: f64) -> EngineResult<EnrichedHolding> {
        let quantity = holding.quantity.to_f64().ok_or_else(|| {
            EngineError::InvalidInput(format!("quantity {} out of range", holding.quantity))
        })?;
        if quantity < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "short position in {} is not supported",
                holding.symbol
            )));
        }

        let quote = self.provider.quote(&holding.symbol).await?;
        if !quote.price.is_finite() || quote.price <= 0.0 {
            return Err(EngineError::DataUnavailable(format!(
                "no valid price for {} (got {})",
                holding.symbol, quote.price
            )));
        }

        let currency = if quote.currency.trim().is_empty() {
            holding.currency.trim().to_uppercase()
        } else {
            quote.currency.trim().to_uppercase()
        };
        let rate = self.conversion_rate(&currency, fx_rate)?;

        let price = quote.price / holding.price_display_unit.divisor();
        let value = quantity * price;

        let local = self.overrides.get(&holding.symbol);
        let name = local
            .and_then(|o| o.name.clone())
            .or_else(|| quote.name.clone())
            .unwrap_or_else(|| holding.symbol.clone());
        let sector = local
            .and_then(|o| o.sector.clone())
            .or_else(|| quote.sector.clone().filter(|s| !s.trim().is_empty()))
            .or_else(|| self.classifier.as_ref().and_then(|c| c.classify(&holding.symbol)))
            .unwrap_or_else(|| UNKNOWN_SECTOR.to_string());

        let (beta, beta_source) = match quote.beta.filter(|b| b.is_finite()) {
            Some(b) => (b, BetaSource::Provider),
            None => {
                let result = self.beta_service.beta_or_default(&holding.symbol).await;
                let source = if result.is_calculated {
                    BetaSource::Calculated
                } else {
                    BetaSource::Default
                };
                (result.beta, source)
            }
        };

        let change_percent = if quote.change_percent.is_finite() {
            quote.change_percent
        } else {
            0.0
        };

        tracing::debug!(
            "Enriched {}: price {:.4} {} x {} = {:.2} (beta {:.2} {:?}, sector {})",
            holding.symbol,
            price,
            currency,
            quantity,
            value,
            beta,
            beta_source,
            sector
        );

        Ok(EnrichedHolding {
            id: holding.id.clone(),
            symbol: holding.symbol.clone(),
            name,
            quantity: holding.quantity,
            currency,
            price,
            price_in_reporting_currency: price * rate,
            value,
            value_in_reporting_currency: value * rate,
            beta,
            beta_source,
            sector,
            change_percent,
            weight: 0.0,
            sparkline: quote.sparkline,
        })
    }
}
