//! Transaction orchestrator
//!
//! Sequences one peer payment:
//!
//! ```text
//! validate → idempotency claim → nonce → authenticate → recipient
//!          → fraud screen → funds check + transfer (account locks)
//!          → commit → ledger pending (+ mining job) → event
//! ```
//!
//! Declines are `Ok(PaymentResult)`; only malformed requests and
//! infrastructure failures are `Err(PaymentError)`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use bipay_core::{
    generate_transaction_id, Amount, Transaction, TransactionStatus, TransactionType,
};
use bipay_fraud::{AnomalyResult, AnomalyScorer, HistoryEntry, ModelStatistics, ScoringSubject};
use bipay_ledger::{Blockchain, ChainError, ChainStats};

use crate::accounts::{Account, InMemoryAccountStore};
use crate::auth::build_authenticator;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, FundsPolicy, PaymentsConfig, ScoringFailPolicy};
use crate::error::PaymentError;
use crate::events::{PaymentEvent, TracingEventSink};
use crate::locks::AccountLocks;
use crate::miner::{Miner, MinerSettings, SharedLedger};
use crate::ports::{AccountStore, Authenticator, EventSink, TransactionRepository};
use crate::repository::{InMemoryTransactionRepository, TransactionPage};
use crate::result::{DeclineReason, PaymentOutcome, PaymentRequest, PaymentResult};
use crate::store::{IdempotencyClaim, IdempotencyStore, NonceStore};

/// External collaborators of the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub repository: Arc<dyn TransactionRepository>,
    pub authenticator: Arc<dyn Authenticator>,
    pub events: Arc<dyn EventSink>,
    pub scorer: Arc<AnomalyScorer>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// In-memory adapters, configured authenticator, lazily fitted scorer
    pub fn in_memory(config: &AppConfig) -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountStore::new()),
            repository: Arc::new(InMemoryTransactionRepository::new()),
            authenticator: build_authenticator(&config.auth),
            events: Arc::new(TracingEventSink),
            scorer: Arc::new(AnomalyScorer::new(config.scoring.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

enum Transfer {
    Done {
        balance_after: Decimal,
        credit_used: bool,
    },
    Declined(DeclineReason),
}

/// Releases an idempotency claim unless the request completed
struct ClaimGuard<'a> {
    store: &'a IdempotencyStore,
    sender: &'a str,
    key: Option<&'a str>,
}

impl ClaimGuard<'_> {
    fn complete(mut self, result: &PaymentResult, now: DateTime<Utc>) {
        if let Some(key) = self.key.take() {
            self.store.complete(self.sender, key, result.clone(), now);
        }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.store.release(self.sender, key);
        }
    }
}

pub struct TransactionOrchestrator {
    config: PaymentsConfig,
    batch_size: usize,
    accounts: Arc<dyn AccountStore>,
    repository: Arc<dyn TransactionRepository>,
    authenticator: Arc<dyn Authenticator>,
    events: Arc<dyn EventSink>,
    scorer: Arc<AnomalyScorer>,
    clock: Arc<dyn Clock>,
    ledger: SharedLedger,
    miner: Miner,
    nonces: Arc<NonceStore>,
    idempotency: Arc<IdempotencyStore>,
    locks: AccountLocks,
    purger: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TransactionOrchestrator {
    /// Wire the orchestrator, start its miner and the expiry sweep (needs a tokio runtime)
    pub fn new(config: &AppConfig, ledger: Blockchain, collaborators: Collaborators) -> Self {
        let ledger: SharedLedger = Arc::new(Mutex::new(
            ledger.with_max_pending(config.ledger.max_pending),
        ));
        let miner = Miner::spawn(
            Arc::clone(&ledger),
            Arc::clone(&collaborators.repository),
            Arc::clone(&collaborators.events),
            MinerSettings {
                beneficiary: config.ledger.reward_beneficiary.clone(),
                workers: config.ledger.mining_workers,
                queue_capacity: config.ledger.mining_queue,
            },
        );

        info!(
            authenticator = collaborators.authenticator.name(),
            funds_policy = ?config.payments.funds_policy,
            scoring_fail_policy = ?config.payments.scoring_fail_policy,
            batch_size = config.ledger.batch_size,
            "Transaction orchestrator ready"
        );

        let nonces = Arc::new(NonceStore::new(secs(config.payments.nonce_ttl_secs)));
        let idempotency = Arc::new(IdempotencyStore::new(secs(
            config.payments.idempotency_ttl_secs,
        )));
        let purger = spawn_purger(
            Arc::clone(&nonces),
            Arc::clone(&idempotency),
            Arc::clone(&collaborators.clock),
            std::time::Duration::from_secs(config.payments.purge_interval_secs.max(1)),
        );

        Self {
            config: config.payments.clone(),
            batch_size: config.ledger.batch_size,
            accounts: collaborators.accounts,
            repository: collaborators.repository,
            authenticator: collaborators.authenticator,
            events: collaborators.events,
            scorer: collaborators.scorer,
            clock: collaborators.clock,
            ledger,
            miner,
            nonces,
            idempotency,
            locks: AccountLocks::new(),
            purger: std::sync::Mutex::new(Some(purger)),
        }
    }

    /// Issue a single-use payment nonce for `account`
    pub fn issue_nonce(&self, account: &str) -> String {
        self.nonces.issue(account, self.clock.now())
    }

    /// Authorize, screen and commit one peer-to-peer payment
    #[tracing::instrument(
        skip(self, request),
        fields(to = %request.to_account, amount = %request.amount)
    )]
    pub async fn process_peer_payment(
        &self,
        sender: &str,
        request: PaymentRequest,
    ) -> Result<PaymentResult, PaymentError> {
        let amount = validate(sender, &request)?;
        let transaction_id = generate_transaction_id();

        let key = request
            .idempotency_key
            .as_deref()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = key {
            match self
                .idempotency
                .claim(sender, key, &transaction_id, self.clock.now())
            {
                IdempotencyClaim::Claimed => {}
                IdempotencyClaim::InFlight { transaction_id } => {
                    warn!(%transaction_id, "Concurrent request with the same idempotency key");
                    return Ok(PaymentResult::in_flight(transaction_id));
                }
                IdempotencyClaim::Completed(previous) => {
                    info!(transaction_id = %previous.transaction_id, "Idempotent replay");
                    return Ok(previous.replayed());
                }
            }
        }
        let guard = ClaimGuard {
            store: &self.idempotency,
            sender,
            key,
        };

        let result = self
            .execute(sender, transaction_id, amount, &request)
            .await?;

        // Auth-stage declines never executed anything, so the key stays reusable
        if result.status != TransactionStatus::DeclinedAuth {
            guard.complete(&result, self.clock.now());
        }
        Ok(result)
    }

    async fn execute(
        &self,
        sender: &str,
        transaction_id: String,
        amount: Amount,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, PaymentError> {
        let now = self.clock.now();
        let mut tx = Transaction::with_id(
            transaction_id,
            sender,
            &request.to_account,
            amount,
            TransactionType::P2p,
            now,
        )?
        .with_description(request.description.clone());

        // Nonce: consumed here whatever happens next
        if let Err(rejection) = self.nonces.consume(&request.nonce, sender, now) {
            warn!(transaction_id = %tx.id, %rejection, "Nonce rejected");
            return self.decline(tx, DeclineReason::NonceInvalid, None).await;
        }

        // Authentication
        let account = self
            .accounts
            .get(sender)
            .await
            .map_err(PaymentError::Account)?
            .ok_or_else(|| PaymentError::SenderNotFound(sender.to_string()))?;
        let auth = self
            .authenticator
            .verify(
                sender,
                account.credential_template.as_deref(),
                request.live_sample.as_deref(),
            )
            .await;
        if !auth.matched {
            warn!(transaction_id = %tx.id, confidence = auth.confidence, "Authentication failed");
            return self
                .decline(tx, DeclineReason::AuthenticationFailed, None)
                .await;
        }

        // Recipient
        if !self
            .accounts
            .exists(&request.to_account)
            .await
            .map_err(PaymentError::Account)?
        {
            return Err(PaymentError::RecipientNotFound(request.to_account.clone()));
        }

        // Fraud screening
        let anomaly = self.screen(&tx).await?;
        tx.risk_score = anomaly.score;
        tx.risk_factors = anomaly.risk_factors.clone();
        if anomaly.degraded {
            match self.config.scoring_fail_policy {
                ScoringFailPolicy::FailClosed => {
                    warn!(transaction_id = %tx.id, "Scoring unavailable, declining");
                    return self
                        .decline(tx, DeclineReason::ScoringUnavailable, Some(&anomaly))
                        .await;
                }
                ScoringFailPolicy::FailOpen => {
                    warn!(transaction_id = %tx.id, "Scoring degraded, proceeding");
                }
            }
        } else if anomaly.is_anomalous {
            tx.is_flagged = true;
            warn!(
                transaction_id = %tx.id,
                score = anomaly.score,
                factors = ?anomaly.risk_factors,
                "Transaction flagged for review"
            );
            return self
                .decline(tx, DeclineReason::FraudReview, Some(&anomaly))
                .await;
        }

        // Funds check and transfer
        let transfer = {
            let _locks = self.locks.lock_pair(sender, &request.to_account).await?;
            self.transfer(sender, &request.to_account, amount.value(), &account)
                .await?
        };
        let (balance_after, credit_used) = match transfer {
            Transfer::Done {
                balance_after,
                credit_used,
            } => (balance_after, credit_used),
            Transfer::Declined(reason) => {
                return self.decline(tx, reason, Some(&anomaly)).await;
            }
        };

        // Commit
        tx.credit_used = credit_used;
        tx.transition(TransactionStatus::Committed, self.clock.now())?;
        tx.ledger_recorded = true;
        self.persist(&tx).await;

        if let Err(e) = self.record_on_ledger(&tx).await {
            error!(transaction_id = %tx.id, error = %e, "Ledger append failed, transfer stands");
            tx.ledger_recorded = false;
            self.persist(&tx).await;
        }

        info!(
            transaction_id = %tx.id,
            from = %tx.from_account,
            to = %tx.to_account,
            amount = %tx.amount,
            credit_used,
            "Payment committed"
        );
        self.publish(PaymentEvent::transaction_created(&tx)).await;

        Ok(PaymentResult {
            transaction_id: tx.id.clone(),
            outcome: PaymentOutcome::Committed,
            status: tx.status,
            message: format!("{} sent to {}", tx.amount, tx.to_account),
            balance_after: Some(balance_after),
            anomaly_score: Some(anomaly.score),
            risk_factors: anomaly.risk_factors,
            credit_used,
            ledger_recorded: tx.ledger_recorded,
            scoring_degraded: anomaly.degraded,
            decline: None,
            duplicate: false,
        })
    }

    async fn screen(&self, tx: &Transaction) -> Result<AnomalyResult, PaymentError> {
        let history: Vec<HistoryEntry> = self
            .repository
            .history(&tx.from_account, self.config.history_window)
            .await
            .map_err(PaymentError::Repository)?
            .iter()
            .map(HistoryEntry::from_transaction)
            .collect();
        let subject = ScoringSubject::from_transaction(tx);
        let scorer = Arc::clone(&self.scorer);

        // the first call may fit the model; keep it off the async workers
        let scored = tokio::task::spawn_blocking(move || scorer.score(&subject, &history)).await;
        Ok(match scored {
            Ok(result) => result,
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "Scoring task failed");
                AnomalyResult::analysis_error(Some(tx.id.clone()))
            }
        })
    }

    /// Caller holds both account locks
    async fn transfer(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        account: &Account,
    ) -> Result<Transfer, PaymentError> {
        let balance = self
            .accounts
            .balance(sender)
            .await
            .map_err(PaymentError::Account)?;
        let remaining = balance - amount;

        let mut credit_used = false;
        if remaining < Decimal::ZERO {
            match self.config.funds_policy {
                FundsPolicy::HardStop => {
                    return Ok(Transfer::Declined(DeclineReason::InsufficientFunds));
                }
                FundsPolicy::Overdraft => {
                    let limit = account
                        .credit_limit
                        .unwrap_or(self.config.default_credit_limit);
                    if -remaining > limit {
                        return Ok(Transfer::Declined(DeclineReason::CreditLimitExceeded));
                    }
                    credit_used = true;
                }
            }
        }

        let balance_after = self
            .accounts
            .transfer(sender, recipient, amount)
            .await
            .map_err(PaymentError::Account)?;

        Ok(Transfer::Done {
            balance_after,
            credit_used,
        })
    }

    async fn record_on_ledger(&self, tx: &Transaction) -> Result<(), bipay_ledger::LedgerError> {
        let pending = self.ledger.lock().await.add_pending(tx.clone())?;
        if pending >= self.batch_size {
            self.miner.request();
        }
        Ok(())
    }

    async fn decline(
        &self,
        mut tx: Transaction,
        reason: DeclineReason,
        anomaly: Option<&AnomalyResult>,
    ) -> Result<PaymentResult, PaymentError> {
        tx.transition(reason.status(), self.clock.now())?;
        self.persist(&tx).await;

        if reason == DeclineReason::FraudReview {
            self.publish(PaymentEvent::transaction_flagged(&tx)).await;
        }

        warn!(transaction_id = %tx.id, reason = reason.code(), "Payment declined");

        let mut result = PaymentResult::declined(&tx.id, reason);
        if let Some(anomaly) = anomaly {
            result.anomaly_score = Some(anomaly.score);
            result.risk_factors = anomaly.risk_factors.clone();
            result.scoring_degraded = anomaly.degraded;
        }
        Ok(result)
    }

    async fn persist(&self, tx: &Transaction) {
        if let Err(e) = self.repository.save(tx).await {
            error!(transaction_id = %tx.id, error = %e, "Failed to persist transaction");
        }
    }

    async fn publish(&self, event: PaymentEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.events.publish(event).await {
            warn!(%event_type, error = %e, "Event publish failed");
        }
    }

    /// Page through an account's transactions, newest first
    pub async fn history(
        &self,
        account: &str,
        page: usize,
        per_page: usize,
    ) -> Result<TransactionPage, PaymentError> {
        self.repository
            .page(account, page, per_page)
            .await
            .map_err(PaymentError::Repository)
    }

    pub async fn transaction(&self, id: &str) -> Result<Option<Transaction>, PaymentError> {
        self.repository
            .get(id)
            .await
            .map_err(PaymentError::Repository)
    }

    pub async fn balance(&self, account: &str) -> Result<Decimal, PaymentError> {
        self.accounts
            .balance(account)
            .await
            .map_err(PaymentError::Account)
    }

    pub async fn open_account(&self, account: Account) -> Result<(), PaymentError> {
        self.accounts
            .insert(account)
            .await
            .map_err(PaymentError::Account)
    }

    pub async fn ledger_stats(&self) -> ChainStats {
        self.ledger.lock().await.stats()
    }

    pub async fn verify_ledger(&self) -> Result<(), ChainError> {
        self.ledger.lock().await.verify()
    }

    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    pub fn scorer_statistics(&self) -> ModelStatistics {
        self.scorer.statistics()
    }

    pub fn blocks_mined(&self) -> u64 {
        self.miner.blocks_mined()
    }

    /// Drop expired nonces and idempotency records now.
    ///
    /// Returns `(nonces, idempotency records)` removed. A background task
    /// does the same every `purge_interval_secs`.
    pub fn purge_expired(&self) -> (usize, usize) {
        purge(&self.nonces, &self.idempotency, self.clock.now())
    }

    /// Wait for queued mining jobs to finish
    pub async fn flush_mining(&self) -> Result<(), PaymentError> {
        self.miner.flush().await
    }

    /// Seal the pending buffer into a block even below the batch size
    pub async fn seal_pending(&self) -> Result<(), PaymentError> {
        self.miner.seal_pending().await
    }

    pub async fn shutdown(&self) {
        self.stop_purger();
        self.miner.shutdown().await;
    }

    fn stop_purger(&self) {
        let handle = self.purger.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for TransactionOrchestrator {
    fn drop(&mut self) {
        self.stop_purger();
    }
}

fn purge(nonces: &NonceStore, idempotency: &IdempotencyStore, now: DateTime<Utc>) -> (usize, usize) {
    (nonces.purge_expired(now), idempotency.purge_expired(now))
}

fn spawn_purger(
    nonces: Arc<NonceStore>,
    idempotency: Arc<IdempotencyStore>,
    clock: Arc<dyn Clock>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (expired_nonces, expired_keys) = purge(&nonces, &idempotency, clock.now());
            if expired_nonces + expired_keys > 0 {
                debug!(expired_nonces, expired_keys, "Expired entries purged");
            }
        }
    })
}

fn secs(value: u64) -> Duration {
    // chrono durations top out at i64::MAX milliseconds
    let capped = i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(capped)
}

fn validate(sender: &str, request: &PaymentRequest) -> Result<Amount, PaymentError> {
    if sender.trim().is_empty() {
        return Err(PaymentError::Validation("sender is required".to_string()));
    }
    if request.to_account.trim().is_empty() {
        return Err(PaymentError::Validation("recipient is required".to_string()));
    }
    if request.to_account == sender {
        return Err(PaymentError::Validation(
            "cannot send a payment to yourself".to_string(),
        ));
    }
    Amount::new(request.amount)
        .map_err(|e| PaymentError::Validation(format!("invalid amount: {e}")))
}
