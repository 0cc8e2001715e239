//! Scoring configuration
//!
//! Every field has a serde default so partial config sections work.

use serde::{Deserialize, Serialize};

/// Configuration for the anomaly scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    // === Model ===
    /// Expected outlier share of the reference dataset
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// Adjusted score above which a transaction is anomalous
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Seed for both the synthetic dataset and the forest
    #[serde(default = "default_seed")]
    pub seed: u64,

    // === Rules ===
    #[serde(default = "default_large_amount_threshold")]
    pub large_amount_threshold: f64,

    /// Amount above which a sender with no history is suspicious
    #[serde(default = "default_new_user_amount_threshold")]
    pub new_user_amount_threshold: f64,

    /// First hour (inclusive) of the normal activity window
    #[serde(default = "default_active_hours_start")]
    pub active_hours_start: u32,

    /// Last hour (inclusive) of the normal activity window
    #[serde(default = "default_active_hours_end")]
    pub active_hours_end: u32,

    #[serde(default = "default_rapid_window_secs")]
    pub rapid_window_secs: i64,

    /// More than this many prior transactions inside the rapid window triggers the rule
    #[serde(default = "default_rapid_tx_limit")]
    pub rapid_tx_limit: usize,
}

fn default_contamination() -> f64 {
    0.1
}

fn default_threshold() -> f64 {
    0.5
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_samples() -> usize {
    256
}

fn default_seed() -> u64 {
    42
}

fn default_large_amount_threshold() -> f64 {
    1500.0
}

fn default_new_user_amount_threshold() -> f64 {
    1000.0
}

fn default_active_hours_start() -> u32 {
    6
}

fn default_active_hours_end() -> u32 {
    23
}

fn default_rapid_window_secs() -> i64 {
    300 // 5 minutes
}

fn default_rapid_tx_limit() -> usize {
    3
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            threshold: default_threshold(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            seed: default_seed(),
            large_amount_threshold: default_large_amount_threshold(),
            new_user_amount_threshold: default_new_user_amount_threshold(),
            active_hours_start: default_active_hours_start(),
            active_hours_end: default_active_hours_end(),
            rapid_window_secs: default_rapid_window_secs(),
            rapid_tx_limit: default_rapid_tx_limit(),
        }
    }
}

impl ScoringConfig {
    /// Check value ranges; returns a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.contamination <= 0.0 || self.contamination >= 0.5 {
            return Err(format!("contamination must be in (0, 0.5), got {}", self.contamination));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!("threshold must be in [0, 1], got {}", self.threshold));
        }
        if self.n_estimators == 0 || self.max_samples < 2 {
            return Err("n_estimators must be > 0 and max_samples >= 2".to_string());
        }
        if self.active_hours_start > self.active_hours_end || self.active_hours_end > 23 {
            return Err(format!(
                "active hours window {}..={} is invalid",
                self.active_hours_start, self.active_hours_end
            ));
        }
        if self.rapid_window_secs <= 0 {
            return Err("rapid_window_secs must be positive".to_string());
        }
        Ok(())
    }

    /// Whether an hour of day falls outside the normal activity window
    pub fn is_unusual_hour(&self, hour: u32) -> bool {
        hour < self.active_hours_start || hour > self.active_hours_end
    }
}
