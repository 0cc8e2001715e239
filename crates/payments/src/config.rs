//! Application configuration
//!
//! One TOML document with a section per concern. Every field has a serde
//! default so a partial (or empty) file is valid.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bipay_fraud::ScoringConfig;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.difficulty > 64 {
            return Err(ConfigError::Validation(format!(
                "ledger.difficulty must be <= 64, got {}",
                self.ledger.difficulty
            )));
        }
        if self.ledger.batch_size == 0 {
            return Err(ConfigError::Validation(
                "ledger.batch_size must be > 0".to_string(),
            ));
        }
        if self.ledger.mining_workers == 0 {
            return Err(ConfigError::Validation(
                "ledger.mining_workers must be > 0".to_string(),
            ));
        }
        if self.ledger.max_pending < self.ledger.batch_size {
            return Err(ConfigError::Validation(format!(
                "ledger.max_pending must be >= ledger.batch_size ({})",
                self.ledger.batch_size
            )));
        }
        if self.ledger.mining_reward < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "ledger.mining_reward must not be negative".to_string(),
            ));
        }
        if self.ledger.reward_beneficiary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ledger.reward_beneficiary must not be empty".to_string(),
            ));
        }

        self.scoring
            .validate()
            .map_err(|e| ConfigError::Validation(format!("scoring: {e}")))?;

        if self.payments.nonce_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "payments.nonce_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.payments.purge_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "payments.purge_interval_secs must be > 0".to_string(),
            ));
        }
        if self.payments.history_window == 0 {
            return Err(ConfigError::Validation(
                "payments.history_window must be > 0".to_string(),
            ));
        }
        if self.payments.default_credit_limit < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "payments.default_credit_limit must not be negative".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.auth.match_threshold) {
            return Err(ConfigError::Validation(format!(
                "auth.match_threshold must be in [0, 1], got {}",
                self.auth.match_threshold
            )));
        }

        if self.storage.backend == StorageBackend::File && self.storage.data_dir.is_none() {
            return Err(ConfigError::Validation(
                "storage.data_dir is required for the file backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Required leading zero hex characters in a sealed block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,

    #[serde(default = "default_mining_reward")]
    pub mining_reward: Decimal,

    /// Pending transactions that trigger a mining job
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_reward_beneficiary")]
    pub reward_beneficiary: String,

    /// Nonce search threads per seal
    #[serde(default = "default_mining_workers")]
    pub mining_workers: usize,

    /// Capacity of the mining job queue
    #[serde(default = "default_mining_queue")]
    pub mining_queue: usize,

    /// Pending transactions held before ledger appends start failing
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_difficulty() -> usize {
    4
}

fn default_mining_reward() -> Decimal {
    Decimal::TEN
}

fn default_batch_size() -> usize {
    5
}

fn default_reward_beneficiary() -> String {
    bipay_core::SYSTEM_ACCOUNT.to_string()
}

fn default_mining_workers() -> usize {
    1
}

fn default_mining_queue() -> usize {
    16
}

fn default_max_pending() -> usize {
    10_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
            batch_size: default_batch_size(),
            reward_beneficiary: default_reward_beneficiary(),
            mining_workers: default_mining_workers(),
            mining_queue: default_mining_queue(),
            max_pending: default_max_pending(),
        }
    }
}

/// What happens when the sender's balance does not cover the amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsPolicy {
    #[default]
    HardStop,
    /// Allow a negative balance down to the sender's credit limit
    Overdraft,
}

/// What happens when the scorer returns a degraded result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFailPolicy {
    /// Decline with `scoring_unavailable`
    #[default]
    FailClosed,
    /// Proceed, marking the result as degraded
    FailOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_secs: u64,

    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,

    /// How often expired nonces and idempotency records are dropped
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Prior transactions handed to the scorer
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default)]
    pub funds_policy: FundsPolicy,

    /// Credit limit for accounts without their own
    #[serde(default)]
    pub default_credit_limit: Decimal,

    #[serde(default)]
    pub scoring_fail_policy: ScoringFailPolicy,
}

fn default_nonce_ttl() -> u64 {
    300 // 5 minutes
}

fn default_idempotency_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_purge_interval() -> u64 {
    60
}

fn default_history_window() -> usize {
    50
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_secs: default_nonce_ttl(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            purge_interval_secs: default_purge_interval(),
            history_window: default_history_window(),
            funds_policy: FundsPolicy::default(),
            default_credit_limit: Decimal::ZERO,
            scoring_fail_policy: ScoringFailPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorKind {
    /// Deterministic descriptor derived from the identity
    #[default]
    Simulated,
    /// Compare a live descriptor sample against the stored template
    Descriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub authenticator: AuthenticatorKind,

    /// Minimum confidence for a match
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

fn default_match_threshold() -> f64 {
    0.80
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authenticator: AuthenticatorKind::default(),
            match_threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.ledger.difficulty, 4);
        assert_eq!(config.ledger.batch_size, 5);
        assert_eq!(config.ledger.mining_reward, dec!(10));
        assert_eq!(config.payments.nonce_ttl_secs, 300);
        assert_eq!(config.payments.history_window, 50);
        assert_eq!(config.payments.purge_interval_secs, 60);
        assert_eq!(config.ledger.max_pending, 10_000);
        assert_eq!(config.payments.funds_policy, FundsPolicy::HardStop);
        assert_eq!(config.payments.scoring_fail_policy, ScoringFailPolicy::FailClosed);
        assert_eq!(config.auth.authenticator, AuthenticatorKind::Simulated);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.scoring.seed, 42);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [ledger]
            difficulty = 2

            [payments]
            funds_policy = "overdraft"
            default_credit_limit = 250
            scoring_fail_policy = "fail_open"

            [scoring]
            threshold = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.difficulty, 2);
        assert_eq!(config.ledger.batch_size, 5);
        assert_eq!(config.payments.funds_policy, FundsPolicy::Overdraft);
        assert_eq!(config.payments.default_credit_limit, dec!(250));
        assert_eq!(config.payments.scoring_fail_policy, ScoringFailPolicy::FailOpen);
        assert_eq!(config.scoring.threshold, 0.6);
        assert_eq!(config.scoring.rapid_tx_limit, 3);
    }

    #[test]
    fn test_validation_errors() {
        let zero_batch = AppConfig::from_toml_str("[ledger]\nbatch_size = 0\n");
        assert!(matches!(zero_batch, Err(ConfigError::Validation(_))));

        let file_without_dir = AppConfig::from_toml_str("[storage]\nbackend = \"file\"\n");
        assert!(matches!(file_without_dir, Err(ConfigError::Validation(_))));

        let bad_threshold = AppConfig::from_toml_str("[auth]\nmatch_threshold = 1.5\n");
        assert!(matches!(bad_threshold, Err(ConfigError::Validation(_))));

        let cap_below_batch = AppConfig::from_toml_str("[ledger]\nbatch_size = 5\nmax_pending = 4\n");
        assert!(matches!(cap_below_batch, Err(ConfigError::Validation(_))));

        let no_purge = AppConfig::from_toml_str("[payments]\npurge_interval_secs = 0\n");
        assert!(matches!(no_purge, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_reward_is_valid() {
        let config = AppConfig::from_toml_str("[ledger]\nmining_reward = 0\n").unwrap();
        assert_eq!(config.ledger.mining_reward, Decimal::ZERO);

        let negative = AppConfig::from_toml_str("[ledger]\nmining_reward = -1\n");
        assert!(matches!(negative, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let result = AppConfig::from_toml_str("[payments]\nfunds_policy = \"yolo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
