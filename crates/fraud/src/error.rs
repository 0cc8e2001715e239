//! Scoring errors
//!
//! These never escape `AnomalyScorer::score`; they are logged and turned
//! into a degraded result.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("Non-finite feature '{name}': {value}")]
    NonFiniteFeature { name: &'static str, value: f64 },

    #[error("Non-finite amount: {0}")]
    NonFiniteAmount(f64),

    #[error("Cannot fit model on an empty dataset")]
    EmptyDataset,

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model produced a non-finite decision value: {0}")]
    NonFiniteDecision(f64),
}

/// Result type for scoring internals
pub type ScoringResult<T> = Result<T, ScoringError>;
