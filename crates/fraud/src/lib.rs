//! BiPay Fraud Scoring
//!
//! Turns a transaction plus the sender's recent history into a risk score.
//!
//! ```text
//! ScoringSubject + [HistoryEntry]
//!         │
//!         ▼
//!  FeatureExtractor ──► FeatureVector (18 dims, zero vector on failure)
//!         │
//!         ▼
//!  StandardScaler ──► IsolationForest ──► decision value
//!         │
//!         ▼
//!  normalize + rule adjustments ──► AnomalyResult
//! ```
//!
//! ## Key Components
//!
//! - [`features::FeatureExtractor`] - deterministic, shape-stable extraction
//! - [`forest::IsolationForest`] - seeded outlier model
//! - [`synthetic`] - seeded reference dataset for the lazy bootstrap fit
//! - [`scorer::AnomalyScorer`] - the scoring pipeline; never errors

pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod model;
pub mod scaler;
pub mod scorer;
pub mod synthetic;

pub use config::ScoringConfig;
pub use error::{ScoringError, ScoringResult};
pub use features::{FeatureExtractor, FeatureVector, HistoryEntry, ScoringSubject, FEATURE_DIM};
pub use forest::{IsolationForest, IsolationForestParams};
pub use model::{OutlierModel, TrainedModel};
pub use scaler::StandardScaler;
pub use scorer::{AnomalyResult, AnomalyScorer, ModelLabel, ModelStatistics, ANALYSIS_ERROR};
