//! Payment request and result types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use bipay_core::TransactionStatus;

/// A peer-to-peer payment as submitted by the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub to_account: String,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    /// Single-use token from `NonceStore::issue`
    pub nonce: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Credential sample captured with the request
    #[serde(default)]
    pub live_sample: Option<String>,
}

impl PaymentRequest {
    pub fn new(to_account: impl Into<String>, amount: Decimal, nonce: impl Into<String>) -> Self {
        Self {
            to_account: to_account.into(),
            amount,
            description: None,
            nonce: nonce.into(),
            idempotency_key: None,
            live_sample: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_live_sample(mut self, sample: impl Into<String>) -> Self {
        self.live_sample = Some(sample.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Machine-readable decline reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    AuthenticationFailed,
    NonceInvalid,
    FraudReview,
    InsufficientFunds,
    CreditLimitExceeded,
    ScoringUnavailable,
}

impl DeclineReason {
    pub fn code(&self) -> &'static str {
        match self {
            DeclineReason::AuthenticationFailed => "authentication_failed",
            DeclineReason::NonceInvalid => "nonce_invalid",
            DeclineReason::FraudReview => "fraud_review",
            DeclineReason::InsufficientFunds => "insufficient_funds",
            DeclineReason::CreditLimitExceeded => "credit_limit_exceeded",
            DeclineReason::ScoringUnavailable => "scoring_unavailable",
        }
    }

    /// Suggested next step, for funds-related declines
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            DeclineReason::InsufficientFunds => {
                Some("Add funds to your account or send a smaller amount")
            }
            DeclineReason::CreditLimitExceeded => {
                Some("Reduce the amount or request a higher credit limit")
            }
            _ => None,
        }
    }

    /// Terminal status recorded for this decline
    pub fn status(&self) -> TransactionStatus {
        match self {
            DeclineReason::AuthenticationFailed | DeclineReason::NonceInvalid => {
                TransactionStatus::DeclinedAuth
            }
            DeclineReason::FraudReview | DeclineReason::ScoringUnavailable => {
                TransactionStatus::DeclinedFraud
            }
            DeclineReason::InsufficientFunds | DeclineReason::CreditLimitExceeded => {
                TransactionStatus::DeclinedFunds
            }
        }
    }

    /// Counterparty-facing message; never carries score details
    pub fn message(&self) -> &'static str {
        match self {
            DeclineReason::AuthenticationFailed => "Authentication failed",
            DeclineReason::NonceInvalid => "Request nonce is invalid, expired or already used",
            DeclineReason::FraudReview => "Transaction requires review",
            DeclineReason::InsufficientFunds => "Insufficient funds",
            DeclineReason::CreditLimitExceeded => "Credit limit exceeded",
            DeclineReason::ScoringUnavailable => {
                "Transaction could not be screened, please try again later"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Committed,
    Declined,
    /// Another request with the same idempotency key is still executing
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub transaction_id: String,
    pub outcome: PaymentOutcome,
    pub status: TransactionStatus,
    pub message: String,
    /// Sender balance after a committed transfer
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub anomaly_score: Option<f64>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub credit_used: bool,
    #[serde(default)]
    pub ledger_recorded: bool,
    #[serde(default)]
    pub scoring_degraded: bool,
    #[serde(default)]
    pub decline: Option<DeclineReason>,
    /// Replayed from the idempotency store
    #[serde(default)]
    pub duplicate: bool,
}

impl PaymentResult {
    pub fn is_committed(&self) -> bool {
        self.outcome == PaymentOutcome::Committed
    }

    pub fn is_declined(&self) -> bool {
        self.outcome == PaymentOutcome::Declined
    }

    pub fn decline_code(&self) -> Option<&'static str> {
        self.decline.map(|d| d.code())
    }

    pub(crate) fn declined(transaction_id: &str, reason: DeclineReason) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            outcome: PaymentOutcome::Declined,
            status: reason.status(),
            message: reason.message().to_string(),
            balance_after: None,
            anomaly_score: None,
            risk_factors: Vec::new(),
            credit_used: false,
            ledger_recorded: false,
            scoring_degraded: false,
            decline: Some(reason),
            duplicate: false,
        }
    }

    pub(crate) fn in_flight(transaction_id: String) -> Self {
        Self {
            transaction_id,
            outcome: PaymentOutcome::Duplicate,
            status: TransactionStatus::DeclinedDuplicate,
            message: "A request with this idempotency key is already being processed".to_string(),
            balance_after: None,
            anomaly_score: None,
            risk_factors: Vec::new(),
            credit_used: false,
            ledger_recorded: false,
            scoring_degraded: false,
            decline: None,
            duplicate: true,
        }
    }

    /// Stored result returned for a replayed key
    pub(crate) fn replayed(mut self) -> Self {
        self.duplicate = true;
        self
    }
}
