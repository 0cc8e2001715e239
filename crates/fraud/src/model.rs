//! Outlier model seam
//!
//! The scorer only needs a decision value per feature vector. Tests and
//! alternative models plug in through [`OutlierModel`].

use tracing::info;

use crate::config::ScoringConfig;
use crate::error::ScoringResult;
use crate::features::FeatureVector;
use crate::forest::{IsolationForest, IsolationForestParams};
use crate::scaler::StandardScaler;
use crate::synthetic;

pub trait OutlierModel: Send + Sync {
    /// Model name for diagnostics
    fn name(&self) -> &str;

    /// Decision value: positive is normal, negative is outlier
    fn decision(&self, features: &FeatureVector) -> f64;

    fn is_outlier(&self, features: &FeatureVector) -> bool {
        self.decision(features) < 0.0
    }

    fn n_estimators(&self) -> usize;
}

/// Scaler plus isolation forest fitted on the same data
#[derive(Debug, Clone)]
pub struct TrainedModel {
    scaler: StandardScaler,
    forest: IsolationForest,
}

impl TrainedModel {
    pub fn fit(samples: &[FeatureVector], params: &IsolationForestParams) -> ScoringResult<Self> {
        let scaler = StandardScaler::fit(samples)?;
        let scaled: Vec<FeatureVector> = samples.iter().map(|s| scaler.transform(s)).collect();
        let forest = IsolationForest::fit(&scaled, params)?;
        Ok(Self { scaler, forest })
    }

    /// Fit on the seeded synthetic reference dataset
    pub fn bootstrap(config: &ScoringConfig) -> ScoringResult<Self> {
        let samples = synthetic::reference_dataset(config.seed);
        let params = IsolationForestParams {
            n_estimators: config.n_estimators,
            max_samples: config.max_samples,
            contamination: config.contamination,
            seed: config.seed,
        };
        let model = Self::fit(&samples, &params)?;
        info!(
            samples = samples.len(),
            n_estimators = model.forest.n_estimators(),
            offset = model.forest.offset(),
            "Anomaly model trained on synthetic reference data"
        );
        Ok(model)
    }
}

impl OutlierModel for TrainedModel {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn decision(&self, features: &FeatureVector) -> f64 {
        self.forest.decision_function(&self.scaler.transform(features))
    }

    fn n_estimators(&self) -> usize {
        self.forest.n_estimators()
    }
}
