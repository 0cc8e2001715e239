//! External ports
//!
//! The orchestrator talks to identity, balances, persistence and event
//! delivery only through these traits. Adapters live in `accounts`,
//! `repository`, `auth` and `events`.

use async_trait::async_trait;
use rust_decimal::Decimal;

use bipay_core::Transaction;

use crate::accounts::Account;
use crate::error::{PublishError, StoreResult};
use crate::events::PaymentEvent;
use crate::repository::TransactionPage;

/// Outcome of a credential check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthOutcome {
    pub matched: bool,
    pub confidence: f64,
}

impl AuthOutcome {
    pub fn rejected() -> Self {
        Self {
            matched: false,
            confidence: 0.0,
        }
    }
}

/// Biometric-equivalent credential check
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &str;

    async fn verify(
        &self,
        identity: &str,
        stored_template: Option<&str>,
        live_sample: Option<&str>,
    ) -> AuthOutcome;
}

/// Account balances and credentials
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Account>>;

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    async fn balance(&self, id: &str) -> StoreResult<Decimal>;

    /// Add `delta` (may be negative) and return the new balance.
    ///
    /// No policy checks here; the orchestrator decides what is allowed.
    async fn apply_delta(&self, id: &str, delta: Decimal) -> StoreResult<Decimal>;

    /// Move `amount` between two accounts and return the sender's new balance.
    ///
    /// Debits then credits; a failed credit reverses the debit. Durable
    /// stores should override this with a single write.
    async fn transfer(&self, from: &str, to: &str, amount: Decimal) -> StoreResult<Decimal> {
        let balance = self.apply_delta(from, -amount).await?;
        if let Err(e) = self.apply_delta(to, amount).await {
            tracing::error!(recipient = to, error = %e, "Credit failed, reversing debit");
            if let Err(undo) = self.apply_delta(from, amount).await {
                tracing::error!(sender = from, error = %undo, "Debit reversal failed");
            }
            return Err(e);
        }
        Ok(balance)
    }

    async fn insert(&self, account: Account) -> StoreResult<()>;
}

/// Durable record of every transaction, including declined ones
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert or replace by id
    async fn save(&self, transaction: &Transaction) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>>;

    /// Committed records only, most recent first, both directions
    async fn history(&self, account: &str, limit: usize) -> StoreResult<Vec<Transaction>>;

    /// 1-based page over every record, declines included
    async fn page(&self, account: &str, page: usize, per_page: usize)
        -> StoreResult<TransactionPage>;

    /// Stamp the sealing block hash; returns how many records were updated
    async fn set_ledger_hash(&self, ids: &[String], hash: &str) -> StoreResult<usize>;

    async fn count(&self) -> StoreResult<usize>;
}

/// Fire-and-forget event delivery
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError>;
}
