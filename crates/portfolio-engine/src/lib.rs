pub mod allocation;
pub mod analyzer;
pub mod beta;
pub mod cache;
pub mod config;
pub mod convergence;
pub mod diversification;
pub mod enrichment;
pub mod shared_math;

pub use allocation::{AllocationEngine, TargetPolicy};
pub use analyzer::PortfolioAnalyzer;
pub use beta::{BetaEngine, BetaService, MIN_BETA_SAMPLES};
pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use config::EngineConfig;
pub use convergence::ConvergenceSimulator;
pub use enrichment::{EnrichmentOverrides, FxRateCache, HoldingEnricher, LocalOverride};
pub use portfolio_core::*;
