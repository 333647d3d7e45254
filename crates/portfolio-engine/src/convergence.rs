use crate::allocation::{self, AllocationEngine};
use portfolio_core::{ConvergenceResult, EngineError, EngineResult, Holding};

pub const DEFAULT_TOLERANCE_PERCENT: f64 = 1.0;
pub const DEFAULT_MAX_MONTHS: u32 = 120;

/// Estimates how many monthly contributions it takes for every holding to come
/// within tolerance of its target weight.
///
/// The allocation rule is path dependent (cash follows the deficits), so this runs the
/// same distribution month by month on a private copy of the holdings instead of
/// predicting the answer in closed form.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceSimulator {
    engine: AllocationEngine,
}

impl ConvergenceSimulator {
    pub fn new(engine: AllocationEngine) -> Self {
        Self { engine }
    }

    /// Simulate with the default 1% tolerance and a 120 month horizon.
    pub fn months_to_ideal(&self, holdings: &[Holding], monthly_amount: f64) -> EngineResult<ConvergenceResult> {
        self.months_to_ideal_with(
            holdings,
            monthly_amount,
            DEFAULT_TOLERANCE_PERCENT,
            DEFAULT_MAX_MONTHS,
        )
    }

    pub fn months_to_ideal_with(
        &self,
        holdings: &[Holding],
        monthly_amount: f64,
        tolerance_percent: f64,
        max_months: u32,
    ) -> EngineResult<ConvergenceResult> {
        if holdings.is_empty() {
            return Err(EngineError::InvalidInput(
                "convergence simulation needs at least one holding".to_string(),
            ));
        }
        allocation::validate_amount("monthly amount", monthly_amount)?;
        if !tolerance_percent.is_finite() || tolerance_percent <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "tolerance must be a positive percentage, got {}",
                tolerance_percent
            )));
        }
        if max_months == 0 {
            return Err(EngineError::InvalidInput(
                "max months must be at least 1".to_string(),
            ));
        }

        let targets = self.engine.resolve_targets(holdings)?;
        let mut values: Vec<f64> = holdings.iter().map(|h| h.current_value).collect();

        if is_ideal(&values, &targets, tolerance_percent) {
            return Ok(ConvergenceResult {
                months: 0,
                reachable: true,
                total_contributed: 0.0,
                final_allocations: allocation::drift_entries(holdings, &values, &targets, tolerance_percent),
            });
        }

        let mut total_contributed = 0.0;
        for month in 1..=max_months {
            let amounts = allocation::distribute(&values, &targets, monthly_amount);
            for (value, amount) in values.iter_mut().zip(amounts.iter()) {
                *value += amount;
            }
            total_contributed += monthly_amount;

            if is_ideal(&values, &targets, tolerance_percent) {
                tracing::debug!(
                    "Portfolio of {} holdings reaches target within {}% after {} months",
                    holdings.len(),
                    tolerance_percent,
                    month
                );
                return Ok(ConvergenceResult {
                    months: month,
                    reachable: true,
                    total_contributed,
                    final_allocations: allocation::drift_entries(holdings, &values, &targets, tolerance_percent),
                });
            }
        }

        tracing::debug!(
            "Portfolio of {} holdings does not converge within {} months",
            holdings.len(),
            max_months
        );
        Ok(ConvergenceResult {
            months: max_months,
            reachable: false,
            total_contributed,
            final_allocations: allocation::drift_entries(holdings, &values, &targets, tolerance_percent),
        })
    }
}

/// Every holding within `tolerance` percentage points of its target.
fn is_ideal(values: &[f64], targets: &[f64], tolerance: f64) -> bool {
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return false;
    }
    values
        .iter()
        .zip(targets.iter())
        .all(|(v, t)| (v / total * 100.0 - t).abs() <= tolerance)
}
