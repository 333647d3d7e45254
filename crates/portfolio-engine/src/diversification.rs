use crate::shared_math;
use portfolio_core::{EnrichedHolding, RiskLevel, SectorAllocation};
use std::collections::HashMap;

/// Distinct sectors at which the sector-count component saturates.
pub const SECTOR_COUNT_CAP: usize = 8;
pub const SECTOR_COUNT_POINTS: f64 = 40.0;
pub const CONCENTRATION_POINTS: f64 = 60.0;

/// Group holdings by sector (reporting-currency value), largest first.
pub fn sector_allocation(holdings: &[EnrichedHolding]) -> Vec<SectorAllocation> {
    let total: f64 = holdings.iter().map(|h| h.value_in_reporting_currency).sum();

    let mut by_sector: HashMap<&str, f64> = HashMap::new();
    for h in holdings {
        *by_sector.entry(h.sector.as_str()).or_insert(0.0) += h.value_in_reporting_currency;
    }

    let mut sectors: Vec<SectorAllocation> = by_sector
        .into_iter()
        .map(|(sector, value)| SectorAllocation {
            sector: sector.to_string(),
            value,
            percent: shared_math::percent_of(value, total),
        })
        .collect();

    sectors.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.sector.cmp(&b.sector))
    });
    sectors
}

/// 0-100 score: up to 40 points for the number of sectors, up to 60 for low
/// concentration (1 - HHI over sector shares).
///
/// A portfolio with no value in any sector scores 0.
pub fn diversification_score(sectors: &[SectorAllocation]) -> u8 {
    let shares: Vec<f64> = sectors
        .iter()
        .filter(|s| s.percent > 0.0)
        .map(|s| s.percent / 100.0)
        .collect();
    if shares.is_empty() {
        return 0;
    }

    let count_score = (shares.len() as f64 / SECTOR_COUNT_CAP as f64).min(1.0) * SECTOR_COUNT_POINTS;
    let hhi = shared_math::herfindahl_index(&shares);
    let concentration_score = (1.0 - hhi) * CONCENTRATION_POINTS;

    (count_score + concentration_score).round().clamp(0.0, 100.0) as u8
}

/// Risk bucket for a portfolio beta. Fixed thresholds, see [`RiskLevel::from_beta`].
pub fn classify_risk(portfolio_beta: f64) -> RiskLevel {
    RiskLevel::from_beta(portfolio_beta)
}
