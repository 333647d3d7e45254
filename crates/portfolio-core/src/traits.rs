use async_trait::async_trait;

use crate::{EngineError, PricePoint, Quote};

/// Source of live quotes and historical closes.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote, EngineError>;

    /// Monthly (or finer) closing prices covering at least the last `months` months,
    /// sorted chronologically.
    async fn historical_closes(&self, symbol: &str, months: u32) -> Result<Vec<PricePoint>, EngineError>;
}

/// Conversion rate source: one unit of `from` expressed in `to`.
#[async_trait]
pub trait FxRateSource: Send + Sync {
    async fn rate(&self, from: &str, to: &str) -> Result<f64, EngineError>;
}

/// Supplies a sector label when neither the local overrides nor the provider have one
pub trait SectorClassifier: Send + Sync {
    fn classify(&self, symbol: &str) -> Option<String>;
}
