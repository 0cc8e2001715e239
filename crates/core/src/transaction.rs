//! Transaction - typed record for a value transfer
//!
//! Created by the orchestrator at intake, advanced through exactly one
//! status transition, then retained (never deleted) for audit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::amount::Amount;
use crate::error::CoreError;

/// Counterparty used for system-generated transactions (mining rewards)
pub const SYSTEM_ACCOUNT: &str = "system";

/// Generate a transaction id: `tx_` followed by 16 hex chars
pub fn generate_transaction_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("tx_{}", &hex[..16])
}

/// Kind of value movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Peer-to-peer transfer between two accounts
    P2p,
    /// Customer to merchant payment
    Merchant,
    Deposit,
    Withdrawal,
    /// System-generated ledger reward, one per sealed block
    MiningReward,
}

/// Lifecycle status of a transaction
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    DeclinedAuth,
    DeclinedFraud,
    DeclinedFunds,
    DeclinedDuplicate,
}

impl TransactionStatus {
    /// Terminal states are never left again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Check if this is one of the decline states
    pub fn is_declined(&self) -> bool {
        matches!(
            self,
            TransactionStatus::DeclinedAuth
                | TransactionStatus::DeclinedFraud
                | TransactionStatus::DeclinedFunds
                | TransactionStatus::DeclinedDuplicate
        )
    }
}

/// A value transfer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    /// Normalized anomaly score in [0, 1]
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub is_flagged: bool,
    /// Transfer drew on the sender's credit line (overdraft policy)
    #[serde(default)]
    pub credit_used: bool,
    /// Whether the ledger accepted the transaction into its pending buffer
    #[serde(default)]
    pub ledger_recorded: bool,
    /// Hash of the block that sealed this transaction, once mined
    #[serde(default)]
    pub ledger_hash: Option<String>,
}

impl Transaction {
    /// Create a new pending transaction with a fresh id
    pub fn new(
        from_account: impl Into<String>,
        to_account: impl Into<String>,
        amount: Amount,
        transaction_type: TransactionType,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        Self::with_id(
            generate_transaction_id(),
            from_account,
            to_account,
            amount,
            transaction_type,
            now,
        )
    }

    /// Create a new pending transaction with a caller-chosen id
    pub fn with_id(
        id: impl Into<String>,
        from_account: impl Into<String>,
        to_account: impl Into<String>,
        amount: Amount,
        transaction_type: TransactionType,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        let from_account = from_account.into();
        let to_account = to_account.into();

        if id.trim().is_empty() {
            return Err(CoreError::EmptyField("id"));
        }
        if from_account.trim().is_empty() {
            return Err(CoreError::EmptyField("from_account"));
        }
        if to_account.trim().is_empty() {
            return Err(CoreError::EmptyField("to_account"));
        }

        Ok(Self {
            id,
            from_account,
            to_account,
            amount,
            transaction_type,
            description: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            status: TransactionStatus::Pending,
            risk_score: 0.0,
            risk_factors: Vec::new(),
            is_flagged: false,
            credit_used: false,
            ledger_recorded: false,
            ledger_hash: None,
        })
    }

    /// System-generated reward paid to the block beneficiary.
    ///
    /// Rewards are committed on creation; they never pass through screening.
    pub fn mining_reward(
        beneficiary: &str,
        reward: Decimal,
        block_index: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let amount = Amount::new(reward)?;
        let id = format!("reward_{}_{}", now.timestamp_millis(), block_index);
        let mut tx = Self::with_id(
            id,
            SYSTEM_ACCOUNT,
            beneficiary,
            amount,
            TransactionType::MiningReward,
            now,
        )?;
        tx.status = TransactionStatus::Committed;
        tx.processed_at = Some(now);
        tx.ledger_recorded = true;
        Ok(tx)
    }

    /// Attach a free-text description
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Advance to a terminal status.
    ///
    /// Only `Pending -> terminal` is legal.
    pub fn transition(&mut self, to: TransactionStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        self.processed_at = Some(now);
        Ok(())
    }

    /// The form recorded inside a block: no back-reference to the block hash.
    pub fn ledger_snapshot(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.ledger_hash = None;
        snapshot
    }

    /// Whether the record involves the given account on either side
    pub fn involves(&self, account: &str) -> bool {
        self.from_account == account || self.to_account == account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(val: Decimal) -> Amount {
        Amount::new(val).unwrap()
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 19);
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn test_status_and_type_parse_from_snake_case() {
        assert_eq!("declined_fraud".parse::<TransactionStatus>(), Ok(TransactionStatus::DeclinedFraud));
        assert_eq!("mining_reward".parse::<TransactionType>(), Ok(TransactionType::MiningReward));
        assert_eq!(TransactionStatus::DeclinedAuth.to_string(), "declined_auth");
        assert_eq!(
            "settled".parse::<TransactionStatus>(),
            Err(strum::ParseError::VariantNotFound)
        );
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = Transaction::new("ALICE", "BOB", amount(dec!(10)), TransactionType::P2p, Utc::now())
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.ledger_hash.is_none());
        assert!(!tx.ledger_recorded);
    }

    #[test]
    fn test_empty_account_rejected() {
        let result = Transaction::new("", "BOB", amount(dec!(10)), TransactionType::P2p, Utc::now());
        assert_eq!(result.unwrap_err(), CoreError::EmptyField("from_account"));
    }

    #[test]
    fn test_single_terminal_transition() {
        let mut tx =
            Transaction::new("ALICE", "BOB", amount(dec!(10)), TransactionType::P2p, Utc::now())
                .unwrap();
        tx.transition(TransactionStatus::Committed, Utc::now()).unwrap();
        assert!(tx.processed_at.is_some());

        let again = tx.transition(TransactionStatus::DeclinedFraud, Utc::now());
        assert!(matches!(again, Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_transition_to_pending_rejected() {
        let mut tx =
            Transaction::new("ALICE", "BOB", amount(dec!(10)), TransactionType::P2p, Utc::now())
                .unwrap();
        assert!(tx.transition(TransactionStatus::Pending, Utc::now()).is_err());
    }

    #[test]
    fn test_mining_reward() {
        let tx = Transaction::mining_reward("miner", dec!(10), 3, Utc::now()).unwrap();
        assert_eq!(tx.from_account, SYSTEM_ACCOUNT);
        assert_eq!(tx.transaction_type, TransactionType::MiningReward);
        assert_eq!(tx.status, TransactionStatus::Committed);
        assert!(tx.id.starts_with("reward_"));
        assert!(tx.id.ends_with("_3"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TransactionStatus::DeclinedFraud.to_string(), "declined_fraud");
        let parsed: TransactionStatus = "committed".parse().unwrap();
        assert_eq!(parsed, TransactionStatus::Committed);
        assert_eq!(TransactionType::MiningReward.to_string(), "mining_reward");
    }
}
