//! Anomaly scorer
//!
//! Combines the outlier model's decision value with deterministic rule
//! adjustments. `score` never fails: any internal error produces a
//! zero-score result tagged [`ANALYSIS_ERROR`] with `degraded = true`, and
//! the caller decides what a degraded result means.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::ScoringConfig;
use crate::error::{ScoringError, ScoringResult};
use crate::features::{parse_timestamp, FeatureExtractor, HistoryEntry, ScoringSubject};
use crate::model::{OutlierModel, TrainedModel};

pub const LARGE_AMOUNT: &str = "large_amount";
pub const NEW_USER_LARGE_AMOUNT: &str = "new_user_large_amount";
pub const UNUSUAL_TIME: &str = "unusual_time";
pub const RAPID_TRANSACTIONS: &str = "rapid_transactions";
pub const ANALYSIS_ERROR: &str = "analysis_error";

const LARGE_AMOUNT_WEIGHT: f64 = 0.2;
const NEW_USER_WEIGHT: f64 = 0.3;
const UNUSUAL_TIME_WEIGHT: f64 = 0.1;
const RAPID_WEIGHT: f64 = 0.2;

/// What the outlier model said, before rule adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLabel {
    Normal,
    Outlier,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub transaction_id: Option<String>,
    /// Adjusted score in [0, 1]
    pub score: f64,
    pub is_anomalous: bool,
    /// Triggered rule tags, in rule order, no duplicates
    pub risk_factors: Vec<String>,
    pub raw_model_label: ModelLabel,
    pub degraded: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl AnomalyResult {
    /// Degraded result used when scoring fails
    pub fn analysis_error(transaction_id: Option<String>) -> Self {
        Self {
            transaction_id,
            score: 0.0,
            is_anomalous: false,
            risk_factors: vec![ANALYSIS_ERROR.to_string()],
            raw_model_label: ModelLabel::Error,
            degraded: true,
            analyzed_at: Utc::now(),
        }
    }

    pub fn has_factor(&self, tag: &str) -> bool {
        self.risk_factors.iter().any(|f| f == tag)
    }
}

/// Snapshot of the scorer's model state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatistics {
    /// `trained` or `not_trained`
    pub model_status: &'static str,
    pub contamination: f64,
    pub threshold: f64,
    pub model_type: String,
    pub n_estimators: usize,
}

pub struct AnomalyScorer {
    config: ScoringConfig,
    extractor: FeatureExtractor,
    // `None` inside means the bootstrap fit failed; it is not retried
    model: OnceLock<Option<Arc<dyn OutlierModel>>>,
}

impl AnomalyScorer {
    /// Scorer that fits its model from the synthetic dataset on first use
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::new(),
            model: OnceLock::new(),
        }
    }

    /// Scorer over an already-fitted model
    pub fn with_model(config: ScoringConfig, model: Arc<dyn OutlierModel>) -> Self {
        let scorer = Self::new(config);
        let _ = scorer.model.set(Some(model));
        scorer
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Fit now instead of on the first `score` call
    pub fn warm_up(&self) -> bool {
        self.model().is_ok()
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.model.get(), Some(Some(_)))
    }

    pub fn statistics(&self) -> ModelStatistics {
        let fitted = self.model.get().and_then(|m| m.as_ref());
        ModelStatistics {
            model_status: if fitted.is_some() { "trained" } else { "not_trained" },
            contamination: self.config.contamination,
            threshold: self.config.threshold,
            model_type: fitted
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| "isolation_forest".to_string()),
            n_estimators: fitted
                .map(|m| m.n_estimators())
                .unwrap_or(self.config.n_estimators),
        }
    }

    /// Score a transaction against the sender's prior history
    pub fn score(&self, subject: &ScoringSubject, history: &[HistoryEntry]) -> AnomalyResult {
        match self.try_score(subject, history) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    transaction_id = subject.transaction_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Anomaly scoring failed"
                );
                AnomalyResult::analysis_error(subject.transaction_id.clone())
            }
        }
    }

    fn model(&self) -> ScoringResult<Arc<dyn OutlierModel>> {
        let slot = self.model.get_or_init(|| {
            match TrainedModel::bootstrap(&self.config) {
                Ok(model) => Some(Arc::new(model) as Arc<dyn OutlierModel>),
                Err(e) => {
                    error!(error = %e, "Anomaly model bootstrap failed");
                    None
                }
            }
        });
        slot.clone()
            .ok_or_else(|| ScoringError::ModelUnavailable("bootstrap fit failed".to_string()))
    }

    fn try_score(
        &self,
        subject: &ScoringSubject,
        history: &[HistoryEntry],
    ) -> ScoringResult<AnomalyResult> {
        let model = self.model()?;
        let now = Utc::now();
        let amount = subject.amount()?;
        let at = subject.time(now)?;

        let features = self.extractor.extract_at(subject, history, now);
        let decision = model.decision(&features);
        if !decision.is_finite() {
            return Err(ScoringError::NonFiniteDecision(decision));
        }
        let is_outlier = model.is_outlier(&features);

        let mut score = ((0.5 - decision) / 1.0).clamp(0.0, 1.0);
        let mut risk_factors = Vec::new();

        if amount > self.config.large_amount_threshold {
            score += LARGE_AMOUNT_WEIGHT;
            risk_factors.push(LARGE_AMOUNT.to_string());
        }

        if history.is_empty() && amount > self.config.new_user_amount_threshold {
            score += NEW_USER_WEIGHT;
            risk_factors.push(NEW_USER_LARGE_AMOUNT.to_string());
        }

        if self.config.is_unusual_hour(at.hour()) {
            score += UNUSUAL_TIME_WEIGHT;
            risk_factors.push(UNUSUAL_TIME.to_string());
        }

        let recent = history
            .iter()
            .filter_map(|h| parse_timestamp(&h.timestamp).ok())
            .filter(|ts| {
                let age = (at - *ts).num_seconds();
                (0..self.config.rapid_window_secs).contains(&age)
            })
            .count();
        if recent > self.config.rapid_tx_limit {
            score += RAPID_WEIGHT;
            risk_factors.push(RAPID_TRANSACTIONS.to_string());
        }

        let score = score.clamp(0.0, 1.0);
        let is_anomalous = score > self.config.threshold || is_outlier;

        debug!(
            transaction_id = subject.transaction_id.as_deref().unwrap_or("-"),
            decision,
            score,
            is_outlier,
            factors = ?risk_factors,
            "Transaction scored"
        );

        Ok(AnomalyResult {
            transaction_id: subject.transaction_id.clone(),
            score,
            is_anomalous,
            risk_factors,
            raw_model_label: if is_outlier {
                ModelLabel::Outlier
            } else {
                ModelLabel::Normal
            },
            degraded: false,
            analyzed_at: now,
        })
    }
}
