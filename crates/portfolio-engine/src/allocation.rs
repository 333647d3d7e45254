use crate::config::EngineConfig;
use crate::shared_math::{self, EPSILON};
use portfolio_core::{AllocationResult, DriftEntry, EngineError, EngineResult, Holding};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Allowed gap between the sum of target allocations and 100 before the policy kicks in.
pub const TARGET_SUM_TOLERANCE: f64 = 0.01;
const SUM_SLACK: f64 = 1e-9;

/// What to do when target allocations do not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPolicy {
    /// Rescale the targets to sum to 100 and log a warning
    #[default]
    Normalize,
    /// Reject the request
    Strict,
}

impl FromStr for TargetPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normalize" => Ok(TargetPolicy::Normalize),
            "strict" => Ok(TargetPolicy::Strict),
            other => Err(EngineError::InvalidInput(format!(
                "unknown target policy '{}' (expected 'normalize' or 'strict')",
                other
            ))),
        }
    }
}

/// Distributes new cash across existing holdings without ever selling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationEngine {
    policy: TargetPolicy,
}

impl AllocationEngine {
    pub fn new(policy: TargetPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.target_policy)
    }

    pub fn policy(&self) -> TargetPolicy {
        self.policy
    }

    /// Split `cash_amount` across `holdings`, one result per holding in input order.
    pub fn allocate(&self, holdings: &[Holding], cash_amount: f64) -> EngineResult<Vec<AllocationResult>> {
        validate_amount("cash amount", cash_amount)?;
        if holdings.is_empty() {
            return Ok(Vec::new());
        }

        let targets = self.resolve_targets(holdings)?;
        let values: Vec<f64> = holdings.iter().map(|h| h.current_value).collect();
        let amounts = distribute(&values, &targets, cash_amount);

        let current_total: f64 = values.iter().sum();
        let new_total = current_total + cash_amount;

        let results = holdings
            .iter()
            .zip(targets.iter())
            .zip(amounts.iter())
            .map(|((holding, &target), &amount)| {
                let new_value = holding.current_value + amount;
                AllocationResult {
                    id: holding.id.clone(),
                    amount_to_invest: amount,
                    current_value: holding.current_value,
                    target_value: target / 100.0 * new_total,
                    new_value,
                    target_allocation: target,
                    current_allocation: shared_math::round_dp(
                        shared_math::percent_of(holding.current_value, current_total),
                        2,
                    ),
                    new_allocation: shared_math::round_dp(
                        shared_math::percent_of(new_value, new_total),
                        2,
                    ),
                }
            })
            .collect();

        Ok(results)
    }

    /// Current drift of each holding from its target.
    pub fn drift(&self, holdings: &[Holding], tolerance_percent: f64) -> EngineResult<Vec<DriftEntry>> {
        if holdings.is_empty() {
            return Ok(Vec::new());
        }
        let targets = self.resolve_targets(holdings)?;
        let values: Vec<f64> = holdings.iter().map(|h| h.current_value).collect();
        Ok(drift_entries(holdings, &values, &targets, tolerance_percent))
    }

    /// Validate holdings and return the effective target percentages under the policy.
    pub(crate) fn resolve_targets(&self, holdings: &[Holding]) -> EngineResult<Vec<f64>> {
        for h in holdings {
            if !h.current_value.is_finite() || h.current_value < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "holding {} has invalid current value {}",
                    h.id, h.current_value
                )));
            }
            if !h.target_allocation.is_finite() || !(0.0..=100.0).contains(&h.target_allocation) {
                return Err(EngineError::InvalidTargets(format!(
                    "holding {} has target allocation {} outside [0, 100]",
                    h.id, h.target_allocation
                )));
            }
        }

        let sum: f64 = holdings.iter().map(|h| h.target_allocation).sum();
        if sum < EPSILON {
            return Err(EngineError::InvalidTargets(
                "target allocations sum to zero".to_string(),
            ));
        }

        let targets: Vec<f64> = holdings.iter().map(|h| h.target_allocation).collect();
        // 33.33 * 3 lands a few ulps past the tolerance in f64
        if (sum - 100.0).abs() <= TARGET_SUM_TOLERANCE + SUM_SLACK {
            return Ok(targets);
        }

        match self.policy {
            TargetPolicy::Strict => Err(EngineError::InvalidTargets(format!(
                "target allocations sum to {:.2}, expected 100",
                sum
            ))),
            TargetPolicy::Normalize => {
                tracing::warn!(
                    "Target allocations sum to {:.2}; normalizing {} holdings to 100",
                    sum,
                    holdings.len()
                );
                Ok(targets.iter().map(|t| t / sum * 100.0).collect())
            }
        }
    }
}

pub(crate) fn validate_amount(label: &str, amount: f64) -> EngineResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "{} must be a non-negative number, got {}",
            label, amount
        )));
    }
    Ok(())
}

/// Core distribution rule over parallel slices of values and target percentages.
///
/// If the total deficit is at least the cash, the cash goes to holdings in proportion
/// to their deficit. Otherwise every deficit is paid in full and the remainder is spread
/// by target weight. The returned amounts are non-negative and sum to `cash_amount`.
pub(crate) fn distribute(values: &[f64], targets: &[f64], cash_amount: f64) -> Vec<f64> {
    if values.is_empty() || cash_amount <= 0.0 {
        return vec![0.0; values.len()];
    }

    let current_total: f64 = values.iter().sum();
    let new_total = current_total + cash_amount;

    let deficits: Vec<f64> = values
        .iter()
        .zip(targets.iter())
        .map(|(&value, &target)| (target / 100.0 * new_total - value).max(0.0))
        .collect();
    let total_deficit: f64 = deficits.iter().sum();

    if total_deficit >= cash_amount && total_deficit > EPSILON {
        return deficits
            .iter()
            .map(|d| d / total_deficit * cash_amount)
            .collect();
    }

    let remainder = cash_amount - total_deficit;
    let target_sum: f64 = targets.iter().sum();
    deficits
        .iter()
        .zip(targets.iter())
        .map(|(&deficit, &target)| {
            let share = if target_sum > EPSILON {
                target / target_sum
            } else {
                0.0
            };
            deficit + remainder * share
        })
        .collect()
}

pub(crate) fn drift_entries(
    holdings: &[Holding],
    values: &[f64],
    targets: &[f64],
    tolerance_percent: f64,
) -> Vec<DriftEntry> {
    let total: f64 = values.iter().sum();
    holdings
        .iter()
        .zip(values.iter())
        .zip(targets.iter())
        .map(|((holding, &value), &target)| {
            let current = shared_math::percent_of(value, total);
            let drift = current - target;
            DriftEntry {
                id: holding.id.clone(),
                current_value: value,
                current_allocation: current,
                target_allocation: target,
                drift,
                within_tolerance: drift.abs() <= tolerance_percent,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn total_invested(results: &[AllocationResult]) -> f64 {
        results.iter().map(|r| r.amount_to_invest).sum()
    }

    #[test]
    fn test_under_funded_goes_to_deficit_only() {
        let holdings = vec![Holding::new("A", 8000.0, 50.0), Holding::new("B", 2000.0, 50.0)];
        let results = AllocationEngine::default().allocate(&holdings, 4000.0).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].amount_to_invest, 0.0);
        assert!((results[1].amount_to_invest - 4000.0).abs() < 1e-9);
        assert_eq!(results[0].current_allocation, 80.0);
        assert_eq!(results[1].current_allocation, 20.0);
        assert_eq!(results[0].new_allocation, 57.14);
        assert_eq!(results[1].new_allocation, 42.86);
        assert!((results[1].target_value - 7000.0).abs() < 1e-9);
    }

    #[test]
    fn test_deficit_split_proportionally() {
        // new total 1000; targets 500/300/200; deficits 0/200/100; cash 150 < 300
        let holdings = vec![
            Holding::new("A", 700.0, 50.0),
            Holding::new("B", 100.0, 30.0),
            Holding::new("C", 50.0, 20.0),
        ];
        let results = AllocationEngine::default().allocate(&holdings, 150.0).unwrap();
        assert_eq!(results[0].amount_to_invest, 0.0);
        assert!((results[1].amount_to_invest - 100.0).abs() < 1e-9);
        assert!((results[2].amount_to_invest - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_deficits_closed_exactly_when_no_holding_over_target() {
        // new total 2000; targets 1200/800; deficits 700/300 equal the cash
        let holdings = vec![Holding::new("A", 500.0, 60.0), Holding::new("B", 500.0, 40.0)];
        let results = AllocationEngine::default().allocate(&holdings, 1000.0).unwrap();
        assert!((results[0].amount_to_invest - 700.0).abs() < 1e-9);
        assert!((results[1].amount_to_invest - 300.0).abs() < 1e-9);
        assert!((results[0].new_value - results[0].target_value).abs() < 1e-9);
        assert!((results[1].new_value - results[1].target_value).abs() < 1e-9);
    }

    #[test]
    fn test_on_target_spreads_by_weight() {
        let holdings = vec![Holding::new("A", 600.0, 60.0), Holding::new("B", 400.0, 40.0)];
        let results = AllocationEngine::default().allocate(&holdings, 500.0).unwrap();
        assert!((results[0].amount_to_invest - 300.0).abs() < 1e-9);
        assert!((results[1].amount_to_invest - 200.0).abs() < 1e-9);
        assert_eq!(results[0].new_allocation, 60.0);
    }

    #[test]
    fn test_remainder_spread_by_target_share() {
        // Raw targets summing to 60: new total 250, target values 75/75, deficits 25/0.
        // The remaining 75 is split by target share, 37.5 each.
        let amounts = distribute(&[50.0, 100.0], &[30.0, 30.0], 100.0);
        assert!((amounts[0] - 62.5).abs() < 1e-9);
        assert!((amounts[1] - 37.5).abs() < 1e-9);

        let amounts = distribute(&[100.0, 100.0], &[30.0, 30.0], 100.0);
        assert!((amounts[0] - 50.0).abs() < 1e-9);
        assert!((amounts[1] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_holdings() {
        let results = AllocationEngine::default().allocate(&[], 100.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_cash() {
        let holdings = vec![Holding::new("A", 100.0, 50.0), Holding::new("B", 0.0, 50.0)];
        let results = AllocationEngine::default().allocate(&holdings, 0.0).unwrap();
        assert!(results.iter().all(|r| r.amount_to_invest == 0.0));
    }

    #[test]
    fn test_empty_portfolio_receives_cash_by_target() {
        let holdings = vec![Holding::new("A", 0.0, 70.0), Holding::new("B", 0.0, 30.0)];
        let results = AllocationEngine::default().allocate(&holdings, 1000.0).unwrap();
        assert!((results[0].amount_to_invest - 700.0).abs() < 1e-9);
        assert!((results[1].amount_to_invest - 300.0).abs() < 1e-9);
        assert_eq!(results[0].current_allocation, 0.0);
    }

    #[test]
    fn test_negative_cash_rejected() {
        let holdings = vec![Holding::new("A", 100.0, 100.0)];
        let err = AllocationEngine::default().allocate(&holdings, -1.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_holding_values_rejected() {
        let engine = AllocationEngine::default();
        let err = engine
            .allocate(&[Holding::new("A", -5.0, 100.0)], 10.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = engine
            .allocate(&[Holding::new("A", 5.0, 120.0)], 10.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTargets(_)));

        let err = engine
            .allocate(&[Holding::new("A", 5.0, 0.0), Holding::new("B", 5.0, 0.0)], 10.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTargets(_)));
    }

    #[test]
    fn test_strict_policy_rejects_bad_sum() {
        let holdings = vec![Holding::new("A", 100.0, 80.0), Holding::new("B", 100.0, 50.0)];
        let err = AllocationEngine::new(TargetPolicy::Strict)
            .allocate(&holdings, 100.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTargets(_)));
    }

    #[test]
    fn test_strict_accepts_thirds_at_two_decimals() {
        let holdings = vec![
            Holding::new("A", 100.0, 33.33),
            Holding::new("B", 100.0, 33.33),
            Holding::new("C", 100.0, 33.33),
        ];
        let results = AllocationEngine::new(TargetPolicy::Strict)
            .allocate(&holdings, 300.0)
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!((total_invested(&results) - 300.0).abs() < 1e-9);
        assert_eq!(results[0].target_allocation, 33.33);

        // One cent further off is still rejected
        let off = vec![
            Holding::new("A", 100.0, 33.33),
            Holding::new("B", 100.0, 33.33),
            Holding::new("C", 100.0, 33.32),
        ];
        assert!(AllocationEngine::new(TargetPolicy::Strict).allocate(&off, 300.0).is_err());
    }

    #[test]
    fn test_policy_from_config() {
        let config = EngineConfig {
            target_policy: TargetPolicy::Strict,
            ..EngineConfig::default()
        };
        assert_eq!(AllocationEngine::from_config(&config).policy(), TargetPolicy::Strict);
    }

    #[test]
    fn test_normalize_policy_rescales() {
        // 60/60 behaves as 50/50
        let holdings = vec![Holding::new("A", 100.0, 60.0), Holding::new("B", 100.0, 60.0)];
        let results = AllocationEngine::default().allocate(&holdings, 200.0).unwrap();
        assert!((results[0].target_allocation - 50.0).abs() < 1e-9);
        assert!((results[0].amount_to_invest - 100.0).abs() < 1e-9);
        assert!((total_invested(&results) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_drift_report() {
        let holdings = vec![Holding::new("A", 8000.0, 50.0), Holding::new("B", 2000.0, 50.0)];
        let drift = AllocationEngine::default().drift(&holdings, 5.0).unwrap();
        assert!((drift[0].drift - 30.0).abs() < 1e-9);
        assert!((drift[1].drift + 30.0).abs() < 1e-9);
        assert!(!drift[0].within_tolerance);

        let holdings = vec![Holding::new("A", 5100.0, 50.0), Holding::new("B", 4900.0, 50.0)];
        let drift = AllocationEngine::default().drift(&holdings, 1.5).unwrap();
        assert!(drift.iter().all(|d| d.within_tolerance));
    }

    #[test]
    fn test_target_policy_from_str() {
        assert_eq!("Strict".parse::<TargetPolicy>().unwrap(), TargetPolicy::Strict);
        assert_eq!(" normalize ".parse::<TargetPolicy>().unwrap(), TargetPolicy::Normalize);
        assert!("loose".parse::<TargetPolicy>().is_err());
    }

    proptest! {
        #[test]
        fn prop_surplus_cash_lifts_every_holding_to_target(
            rows in prop::collection::vec((0.0..100_000.0f64, 1.0..100.0f64), 1..8),
            target_sum in 1.0..99.0f64,
            cash in 0.01..1_000_000.0f64,
        ) {
            // Raw targets summing below 100 leave cash over once every deficit is paid
            let weight_sum: f64 = rows.iter().map(|(_, w)| w).sum();
            let values: Vec<f64> = rows.iter().map(|(v, _)| *v).collect();
            let targets: Vec<f64> = rows.iter().map(|(_, w)| w / weight_sum * target_sum).collect();

            let new_total = values.iter().sum::<f64>() + cash;
            let total_deficit: f64 = values
                .iter()
                .zip(targets.iter())
                .map(|(v, t)| (t / 100.0 * new_total - v).max(0.0))
                .sum();

            let amounts = distribute(&values, &targets, cash);
            prop_assert!((amounts.iter().sum::<f64>() - cash).abs() <= 1e-6 * cash.max(1.0));
            prop_assert!(amounts.iter().all(|a| *a >= 0.0));

            if total_deficit < cash {
                for ((v, t), a) in values.iter().zip(targets.iter()).zip(amounts.iter()) {
                    prop_assert!(v + a >= t / 100.0 * new_total - 1e-6 * new_total);
                }
            }
        }
    }
}
