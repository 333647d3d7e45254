use crate::beta::BetaService;
use crate::cache::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::diversification;
use crate::enrichment::{EnrichmentOverrides, FxRateCache, HoldingEnricher};
use crate::shared_math;
use futures_util::stream::{self, StreamExt};
use portfolio_core::{
    EngineError, EngineResult, EnrichedHolding, EnrichmentFailure, FxRateSource, HybridHolding,
    MarketDataProvider, PortfolioAnalysis, RiskLevel, SectorClassifier,
};
use std::sync::Arc;
use std::time::Duration;

/// Portfolio-level risk and diversification analysis over live market data.
pub struct PortfolioAnalyzer {
    enricher: HoldingEnricher,
    fx: FxRateCache,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl PortfolioAnalyzer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        fx_source: Arc<dyn FxRateSource>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(provider, fx_source, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn MarketDataProvider>,
        fx_source: Arc<dyn FxRateSource>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let beta_service = Arc::new(BetaService::new(provider.clone(), &config, clock.clone()));
        let enricher = HoldingEnricher::new(
            provider,
            beta_service,
            &config.reporting_currency,
            &config.foreign_currency,
        );

        Self {
            enricher,
            fx: FxRateCache::new(fx_source, config.fx_fallback_rate),
            config,
            clock,
        }
    }

    pub fn with_overrides(mut self, overrides: EnrichmentOverrides) -> Self {
        tracing::info!("Loaded {} local enrichment overrides", overrides.len());
        self.enricher.set_overrides(overrides);
        self
    }

    pub fn with_sector_classifier(mut self, classifier: Arc<dyn SectorClassifier>) -> Self {
        self.enricher.set_classifier(classifier);
        self
    }

    /// Enrich every holding and aggregate the portfolio.
    ///
    /// Holdings that fail enrichment are left out of every aggregate and reported in
    /// `failed_holdings`. Fails only when no holding could be enriched.
    pub async fn analyze(&self, holdings: &[HybridHolding]) -> EngineResult<PortfolioAnalysis> {
        let analyzed_at = self.clock.now();
        if holdings.is_empty() {
            return Ok(PortfolioAnalysis::empty(&self.config.reporting_currency, 1.0, analyzed_at));
        }

        // One rate for the whole batch
        let fx_rate = self
            .fx
            .rate(&self.config.foreign_currency, &self.config.reporting_currency)
            .await;

        let pause = Duration::from_millis(self.config.enrich_pause_ms);
        let outcomes: Vec<(&HybridHolding, EngineResult<EnrichedHolding>)> = stream::iter(holdings)
            .map(|holding| async move {
                let result = self.enricher.enrich(holding, fx_rate).await;
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                (holding, result)
            })
            .buffer_unordered(self.config.enrich_concurrency.max(1))
            .collect()
            .await;

        let mut enriched = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (holding, result) in outcomes {
            match result {
                Ok(h) => enriched.push(h),
                Err(e) => {
                    tracing::warn!("Failed to enrich {} ({}): {}", holding.symbol, holding.id, e);
                    failures.push(EnrichmentFailure {
                        holding_id: holding.id.clone(),
                        symbol: holding.symbol.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        failures.sort_by(|a, b| a.holding_id.cmp(&b.holding_id));
        if enriched.is_empty() {
            tracing::error!("No holdings could be enriched ({} failures)", failures.len());
            return Err(EngineError::AllEnrichmentFailed { failures });
        }

        let mut analysis = summarize(enriched, &self.config.reporting_currency, fx_rate, analyzed_at);
        analysis.is_partial = !failures.is_empty();
        analysis.failed_holdings = failures;

        tracing::info!(
            "Analyzed {} holdings ({} failed): {:.2} {}, beta {:.2} ({}), diversification {}",
            analysis.holdings.len(),
            analysis.failed_holdings.len(),
            analysis.total_value_in_reporting_currency,
            analysis.reporting_currency,
            analysis.portfolio_beta,
            analysis.risk_level.as_str(),
            analysis.diversification_score
        );

        Ok(analysis)
    }
}

/// Aggregate already-enriched holdings into a [`PortfolioAnalysis`].
///
/// Fills in each holding's weight and sorts holdings by reporting-currency value,
/// largest first. A portfolio with no value is classified moderate.
pub fn summarize(
    mut holdings: Vec<EnrichedHolding>,
    reporting_currency: &str,
    fx_rate: f64,
    analyzed_at: chrono::DateTime<chrono::Utc>,
) -> PortfolioAnalysis {
    let total_value: f64 = holdings.iter().map(|h| h.value).sum();
    let total_reporting: f64 = holdings.iter().map(|h| h.value_in_reporting_currency).sum();

    for h in holdings.iter_mut() {
        h.weight = shared_math::percent_of(h.value_in_reporting_currency, total_reporting);
    }

    let portfolio_beta: f64 = holdings.iter().map(|h| h.beta * h.weight / 100.0).sum();
    let daily_change: f64 = holdings
        .iter()
        .map(|h| h.change_percent / 100.0 * h.value_in_reporting_currency)
        .sum();

    let sector_allocation = diversification::sector_allocation(&holdings);
    let diversification_score = diversification::diversification_score(&sector_allocation);
    let risk_level = if total_reporting > shared_math::EPSILON {
        diversification::classify_risk(portfolio_beta)
    } else {
        RiskLevel::Moderate
    };

    holdings.sort_by(|a, b| {
        b.value_in_reporting_currency
            .partial_cmp(&a.value_in_reporting_currency)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    PortfolioAnalysis {
        reporting_currency: reporting_currency.to_string(),
        fx_rate,
        total_value,
        total_value_in_reporting_currency: total_reporting,
        portfolio_beta,
        daily_change_percent: shared_math::percent_of(daily_change, total_reporting),
        daily_change_in_reporting_currency: daily_change,
        diversification_score,
        sector_allocation,
        holdings,
        risk_level,
        failed_holdings: Vec::new(),
        is_partial: false,
        analyzed_at,
    }
}
