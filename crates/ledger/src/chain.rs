//! Blockchain - chain of sealed blocks plus the pending buffer
//!
//! Single writer: callers wrap a `Blockchain` in one chain-wide lock.
//! Only the nonce search (`pow::seal`) is meant to run outside that lock.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;

use bipay_core::{Transaction, TransactionType, SYSTEM_ACCOUNT};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::block::{Block, CandidateBlock};
use crate::error::{ChainError, LedgerError};
use crate::hash::{meets_difficulty, verify_chain};
use crate::pow;

/// Read surface consumed by health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStats {
    pub block_count: usize,
    pub tx_count: usize,
    pub pending_count: usize,
    pub difficulty: usize,
    pub reward: Decimal,
    pub is_valid: bool,
}

/// Append-only hash chain
#[derive(Debug)]
pub struct Blockchain {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    /// Ids drained into the candidate currently being sealed
    in_flight: Option<HashSet<String>>,
    /// Every transaction id in the committed chain
    committed_ids: HashSet<String>,
    difficulty: usize,
    mining_reward: Decimal,
    max_pending: usize,
}

impl Blockchain {
    /// Create a chain holding only a fresh genesis block
    pub fn new(difficulty: usize, mining_reward: Decimal) -> Self {
        let genesis = Block::genesis(Utc::now());
        tracing::info!(genesis = %genesis.hash, difficulty, "Blockchain initialized");
        Self {
            chain: vec![genesis],
            pending: Vec::new(),
            in_flight: None,
            committed_ids: HashSet::new(),
            difficulty,
            mining_reward,
            max_pending: usize::MAX,
        }
    }

    /// Rebuild from previously sealed blocks (snapshot restore).
    ///
    /// Blocks are verified before being accepted.
    pub fn from_blocks(
        blocks: Vec<Block>,
        difficulty: usize,
        mining_reward: Decimal,
    ) -> Result<Self, LedgerError> {
        verify_chain(&blocks, difficulty)?;
        let committed_ids = blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        Ok(Self {
            chain: blocks,
            pending: Vec::new(),
            in_flight: None,
            committed_ids,
            difficulty,
            mining_reward,
            max_pending: usize::MAX,
        })
    }

    /// Cap the pending buffer; `add_pending` fails once it is full
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Add a transaction to the pending buffer.
    ///
    /// Returns the pending buffer size after the insert.
    pub fn add_pending(&mut self, transaction: Transaction) -> Result<usize, LedgerError> {
        if transaction.id.trim().is_empty() {
            return Err(LedgerError::EmptyField("id"));
        }
        if transaction.from_account.trim().is_empty() {
            return Err(LedgerError::EmptyField("from_account"));
        }
        if transaction.to_account.trim().is_empty() {
            return Err(LedgerError::EmptyField("to_account"));
        }
        if self.is_known(&transaction.id) {
            return Err(LedgerError::DuplicateTransaction(transaction.id));
        }
        if self.pending.len() >= self.max_pending {
            return Err(LedgerError::PendingFull(self.max_pending));
        }

        tracing::debug!(id = %transaction.id, "Transaction added to pending");
        self.pending.push(transaction.ledger_snapshot());
        Ok(self.pending.len())
    }

    /// Whether an id is committed, pending or being sealed
    fn is_known(&self, id: &str) -> bool {
        self.committed_ids.contains(id)
            || self.pending.iter().any(|tx| tx.id == id)
            || self.in_flight.as_ref().map_or(false, |ids| ids.contains(id))
    }

    /// Drain the pending buffer into a candidate block bound to the current tip.
    ///
    /// Returns `Ok(None)` when there is nothing to mine.
    pub fn begin_block(
        &mut self,
        beneficiary: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateBlock>, LedgerError> {
        if self.in_flight.is_some() {
            return Err(LedgerError::CandidateInFlight);
        }
        if self.pending.is_empty() {
            return Ok(None);
        }

        let index = self.chain.len() as u64;
        // a zero reward seals the block without a reward record
        let reward = if self.mining_reward > Decimal::ZERO {
            Some(Transaction::mining_reward(beneficiary, self.mining_reward, index, now)?)
        } else {
            None
        };

        let mut transactions = std::mem::take(&mut self.pending);
        transactions.extend(reward);

        self.in_flight = Some(transactions.iter().map(|tx| tx.id.clone()).collect());

        Ok(Some(CandidateBlock {
            index,
            timestamp: now,
            transactions,
            previous_hash: self.latest_block().hash.clone(),
        }))
    }

    /// Append a sealed block. It must extend the current tip.
    pub fn append_sealed(&mut self, block: Block) -> Result<&Block, LedgerError> {
        if self.in_flight.is_none() {
            return Err(LedgerError::NoCandidate);
        }

        let stale = |reason: &str| LedgerError::StaleBlock {
            index: block.index,
            reason: reason.to_string(),
        };
        if block.index != self.chain.len() as u64 {
            return Err(stale("index is not the next height"));
        }
        if block.previous_hash != self.latest_block().hash {
            return Err(stale("previous_hash is not the tip hash"));
        }
        let calculated = block.compute_hash();
        if block.hash != calculated {
            return Err(ChainError::InvalidHash {
                index: block.index,
                expected: calculated,
                actual: block.hash.clone(),
            }
            .into());
        }
        if !meets_difficulty(&block.hash, self.difficulty) {
            return Err(ChainError::InsufficientWork {
                index: block.index,
                hash: block.hash.clone(),
                difficulty: self.difficulty,
            }
            .into());
        }

        self.committed_ids
            .extend(block.transactions.iter().map(|tx| tx.id.clone()));
        self.in_flight = None;

        tracing::info!(
            index = block.index,
            hash = %block.hash,
            txs = block.transactions.len(),
            "Block appended"
        );
        self.chain.push(block);
        Ok(self.latest_block())
    }

    /// Give up on a candidate: its transactions go back to the front of the
    /// pending buffer, the reward is discarded.
    pub fn abort_block(&mut self, candidate: CandidateBlock) {
        let mut restored: Vec<Transaction> = candidate
            .transactions
            .into_iter()
            .filter(|tx| {
                !(tx.transaction_type == TransactionType::MiningReward
                    && tx.from_account == SYSTEM_ACCOUNT)
            })
            .collect();
        tracing::warn!(
            index = candidate.index,
            restored = restored.len(),
            "Candidate block aborted"
        );
        restored.append(&mut self.pending);
        self.pending = restored;
        self.in_flight = None;
    }

    /// Mine all pending transactions inline.
    ///
    /// No-op (`Ok(None)`) when the pending buffer is empty.
    pub fn mine(&mut self, beneficiary: &str) -> Result<Option<Block>, LedgerError> {
        let Some(candidate) = self.begin_block(beneficiary, Utc::now())? else {
            return Ok(None);
        };

        tracing::info!(txs = candidate.transactions.len(), "Mining block");
        let never = AtomicBool::new(false);
        match pow::seal(&candidate, self.difficulty, &never) {
            Some(block) => match self.append_sealed(block) {
                Ok(appended) => Ok(Some(appended.clone())),
                Err(e) => {
                    self.abort_block(candidate);
                    Err(e)
                }
            },
            None => {
                self.abort_block(candidate);
                Ok(None)
            }
        }
    }

    /// Full integrity check, reporting the first violation
    pub fn verify(&self) -> Result<(), ChainError> {
        verify_chain(&self.chain, self.difficulty)
    }

    /// Whether every block passes `verify`
    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            block_count: self.chain.len(),
            tx_count: self.chain.iter().map(|b| b.transactions.len()).sum(),
            pending_count: self.pending.len(),
            difficulty: self.difficulty,
            reward: self.mining_reward,
            is_valid: self.is_valid(),
        }
    }

    /// Locate a committed transaction: `(block index, block hash)`
    pub fn find_transaction(&self, transaction_id: &str) -> Option<(u64, &str)> {
        if !self.committed_ids.contains(transaction_id) {
            return None;
        }
        self.chain
            .iter()
            .find(|b| b.contains(transaction_id))
            .map(|b| (b.index, b.hash.as_str()))
    }

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least the genesis block
        &self.chain[self.chain.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> Decimal {
        self.mining_reward
    }

    /// Whether a candidate is currently being sealed
    pub fn has_candidate(&self) -> bool {
        self.in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bipay_core::Amount;
    use rust_decimal_macros::dec;

    fn transaction(id: &str, amount: Decimal) -> Transaction {
        Transaction::with_id(
            id,
            "ALICE",
            "BOB",
            Amount::new(amount).unwrap(),
            TransactionType::P2p,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_chain_has_genesis() {
        let chain = Blockchain::new(2, dec!(10));
        assert_eq!(chain.blocks().len(), 1);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_mine_empty_is_noop() {
        let mut chain = Blockchain::new(2, dec!(10));
        assert!(chain.mine("system").unwrap().is_none());
        assert_eq!(chain.blocks().len(), 1);
    }

    #[test]
    fn test_mine_includes_reward() {
        let mut chain = Blockchain::new(2, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        chain.add_pending(transaction("tx_2", dec!(7))).unwrap();

        let block = chain.mine("miner").unwrap().unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 3);
        let reward = block.transactions.last().unwrap();
        assert_eq!(reward.transaction_type, TransactionType::MiningReward);
        assert_eq!(reward.to_account, "miner");
        assert_eq!(reward.amount.value(), dec!(10));
        assert!(chain.pending().is_empty());
        assert!(chain.is_valid());
    }

    #[test]
    fn test_zero_reward_seals_without_reward_record() {
        let mut chain = Blockchain::new(1, Decimal::ZERO);
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();

        let block = chain.mine("miner").unwrap().unwrap();

        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].id, "tx_1");
        assert!(chain.pending().is_empty());
        assert!(chain.is_valid());
    }

    #[test]
    fn test_pending_cap() {
        let mut chain = Blockchain::new(1, dec!(10)).with_max_pending(2);
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        chain.add_pending(transaction("tx_2", dec!(5))).unwrap();

        let result = chain.add_pending(transaction("tx_3", dec!(5)));
        assert!(matches!(result, Err(LedgerError::PendingFull(2))));

        // mining frees the buffer
        chain.mine("system").unwrap().unwrap();
        assert_eq!(chain.add_pending(transaction("tx_3", dec!(5))).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_rejected_everywhere() {
        let mut chain = Blockchain::new(1, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();

        // Pending duplicate
        let result = chain.add_pending(transaction("tx_1", dec!(5)));
        assert!(matches!(result, Err(LedgerError::DuplicateTransaction(_))));

        // In-flight duplicate
        let candidate = chain.begin_block("system", Utc::now()).unwrap().unwrap();
        let result = chain.add_pending(transaction("tx_1", dec!(5)));
        assert!(matches!(result, Err(LedgerError::DuplicateTransaction(_))));

        // Committed duplicate
        let block = pow::seal(&candidate, 1, &AtomicBool::new(false)).unwrap();
        chain.append_sealed(block).unwrap();
        let result = chain.add_pending(transaction("tx_1", dec!(5)));
        assert!(matches!(result, Err(LedgerError::DuplicateTransaction(_))));
    }

    #[test]
    fn test_empty_field_rejected() {
        let mut chain = Blockchain::new(1, dec!(10));
        let mut tx = transaction("tx_1", dec!(5));
        tx.to_account = " ".to_string();
        let result = chain.add_pending(tx);
        assert!(matches!(result, Err(LedgerError::EmptyField("to_account"))));
    }

    #[test]
    fn test_abort_restores_pending_order() {
        let mut chain = Blockchain::new(1, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        let candidate = chain.begin_block("system", Utc::now()).unwrap().unwrap();
        chain.add_pending(transaction("tx_2", dec!(5))).unwrap();

        chain.abort_block(candidate);

        let ids: Vec<_> = chain.pending().iter().map(|tx| tx.id.as_str()).collect();
        assert_eq!(ids, vec!["tx_1", "tx_2"]);
        assert!(!chain.has_candidate());
    }

    #[test]
    fn test_second_candidate_rejected() {
        let mut chain = Blockchain::new(1, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        let _candidate = chain.begin_block("system", Utc::now()).unwrap().unwrap();
        chain.add_pending(transaction("tx_2", dec!(5))).unwrap();

        let result = chain.begin_block("system", Utc::now());
        assert!(matches!(result, Err(LedgerError::CandidateInFlight)));
    }

    #[test]
    fn test_stale_block_rejected() {
        let mut chain = Blockchain::new(1, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        let candidate = chain.begin_block("system", Utc::now()).unwrap().unwrap();

        let mut block = pow::seal(&candidate, 1, &AtomicBool::new(false)).unwrap();
        block.previous_hash = "elsewhere".to_string();

        let result = chain.append_sealed(block);
        assert!(matches!(result, Err(LedgerError::StaleBlock { .. })));
    }

    #[test]
    fn test_stats_and_lookup() {
        let mut chain = Blockchain::new(1, dec!(10));
        chain.add_pending(transaction("tx_1", dec!(5))).unwrap();
        let block = chain.mine("system").unwrap().unwrap();
        chain.add_pending(transaction("tx_2", dec!(5))).unwrap();

        let stats = chain.stats();
        assert_eq!(stats.block_count, 2);
        assert_eq!(stats.tx_count, 2);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.difficulty, 1);
        assert_eq!(stats.reward, dec!(10));
        assert!(stats.is_valid);

        assert_eq!(chain.find_transaction("tx_1"), Some((1, block.hash.as_str())));
        assert_eq!(chain.find_transaction("tx_2"), None);
    }
}
