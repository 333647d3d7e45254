use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A position as seen by the allocation engine and the convergence simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: String,
    /// Market value in the reporting currency
    pub current_value: f64,
    /// Desired weight, 0-100
    pub target_allocation: f64,
}

impl Holding {
    pub fn new(id: impl Into<String>, current_value: f64, target_allocation: f64) -> Self {
        Self {
            id: id.into(),
            current_value,
            target_allocation,
        }
    }
}

/// How much of a cash injection goes to one holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub id: String,
    pub amount_to_invest: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub new_value: f64,
    pub target_allocation: f64,
    /// Pre-investment weight, percent rounded to 2 dp
    pub current_allocation: f64,
    /// Post-investment weight, percent rounded to 2 dp
    pub new_allocation: f64,
}

/// Distance of one holding from its target weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub id: String,
    pub current_value: f64,
    pub current_allocation: f64,
    pub target_allocation: f64,
    /// current_allocation - target_allocation, in percentage points
    pub drift: f64,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub months: u32,
    pub reachable: bool,
    pub total_contributed: f64,
    pub final_allocations: Vec<DriftEntry>,
}

/// Unit in which the holdings store quotes a security's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceUnit {
    #[default]
    Major,
    /// Hundredths of the currency (pence, cents)
    Minor,
}

impl PriceUnit {
    pub fn divisor(&self) -> f64 {
        match self {
            PriceUnit::Major => 1.0,
            PriceUnit::Minor => 100.0,
        }
    }
}

/// Holding record as supplied by the holdings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridHolding {
    pub id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub currency: String,
    #[serde(default)]
    pub price_display_unit: PriceUnit,
}

/// Live quote from the market data provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: f64,
    pub currency: String,
    pub change_percent: f64,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub sparkline: Vec<f64>,
}

/// One historical close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaResult {
    pub beta: f64,
    /// Number of aligned return observations used
    pub sample_size: usize,
    /// False when the neutral default was substituted
    pub is_calculated: bool,
    pub alpha: f64,
    pub r_squared: f64,
}

impl BetaResult {
    /// Market-average risk, assumed when history is too short.
    pub const DEFAULT_BETA: f64 = 1.0;

    pub fn fallback(sample_size: usize) -> Self {
        Self {
            beta: Self::DEFAULT_BETA,
            sample_size,
            is_calculated: false,
            alpha: 0.0,
            r_squared: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetaSource {
    Provider,
    Calculated,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedHolding {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub currency: String,
    pub price: f64,
    pub price_in_reporting_currency: f64,
    pub value: f64,
    pub value_in_reporting_currency: f64,
    pub beta: f64,
    pub beta_source: BetaSource,
    pub sector: String,
    pub change_percent: f64,
    /// Percent of portfolio by reporting-currency value. Filled in by the aggregator.
    pub weight: f64,
    /// Display only
    pub sparkline: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorAllocation {
    pub sector: String,
    pub value: f64,
    pub percent: f64,
}

/// Overall portfolio risk bucket derived from weighted beta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    pub const CONSERVATIVE_BELOW: f64 = 0.8;
    pub const AGGRESSIVE_ABOVE: f64 = 1.2;

    pub fn from_beta(beta: f64) -> Self {
        match beta {
            b if b < Self::CONSERVATIVE_BELOW => RiskLevel::Conservative,
            b if b > Self::AGGRESSIVE_ABOVE => RiskLevel::Aggressive,
            // NaN lands here too
            _ => RiskLevel::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Conservative => "conservative",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentFailure {
    pub holding_id: String,
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAnalysis {
    pub reporting_currency: String,
    /// Rate applied to holdings quoted in the foreign currency
    pub fx_rate: f64,
    pub total_value: f64,
    pub total_value_in_reporting_currency: f64,
    pub portfolio_beta: f64,
    pub daily_change_percent: f64,
    pub daily_change_in_reporting_currency: f64,
    /// 0-100
    pub diversification_score: u8,
    pub sector_allocation: Vec<SectorAllocation>,
    /// Sorted by reporting-currency value, descending
    pub holdings: Vec<EnrichedHolding>,
    pub risk_level: RiskLevel,
    pub failed_holdings: Vec<EnrichmentFailure>,
    /// True when some holdings were dropped from the aggregates
    pub is_partial: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl PortfolioAnalysis {
    pub fn empty(reporting_currency: &str, fx_rate: f64, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            reporting_currency: reporting_currency.to_string(),
            fx_rate,
            total_value: 0.0,
            total_value_in_reporting_currency: 0.0,
            portfolio_beta: 0.0,
            daily_change_percent: 0.0,
            daily_change_in_reporting_currency: 0.0,
            diversification_score: 0,
            sector_allocation: Vec::new(),
            holdings: Vec::new(),
            risk_level: RiskLevel::Moderate,
            failed_holdings: Vec::new(),
            is_partial: false,
            analyzed_at,
        }
    }
}
