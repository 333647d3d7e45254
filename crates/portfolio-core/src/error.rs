use thiserror::Error;

use crate::types::EnrichmentFailure;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid target allocations: {0}")]
    InvalidTargets(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Unsupported currency {currency} (reporting currency is {reporting})")]
    UnsupportedCurrency { currency: String, reporting: String },

    #[error("Enrichment failed for all {} holdings", failures.len())]
    AllEnrichmentFailed { failures: Vec<EnrichmentFailure> },
}

pub type EngineResult<T> = Result<T, EngineError>;
