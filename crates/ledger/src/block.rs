//! Block types
//!
//! A `CandidateBlock` owns its transactions while it is being built and
//! sealed. Sealing turns it into a `Block` carrying a nonce and a hash that
//! satisfies the difficulty target.

use bipay_core::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::calculate_block_hash;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Lifecycle of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Transactions drained from the pending buffer, no nonce yet
    Building,
    /// Nonce found, hash meets difficulty
    Sealed,
    /// Part of the chain (terminal)
    Appended,
}

/// A sealed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Create the genesis block (index 0, no transactions, not mined)
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        let mut block = Self {
            index: 0,
            timestamp,
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Recompute the hash from the block contents
    pub fn compute_hash(&self) -> String {
        calculate_block_hash(
            self.index,
            &self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// Check if a transaction id is sealed in this block
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id == transaction_id)
    }
}

/// A block under construction, bound to the chain tip it was built on
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBlock {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
}

impl CandidateBlock {
    pub fn state(&self) -> BlockState {
        BlockState::Building
    }

    /// Attach the found nonce and hash
    pub fn into_sealed(self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis(Utc::now());
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert_eq!(genesis.hash.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_nonce() {
        let mut block = Block::genesis(Utc::now());
        let before = block.compute_hash();
        block.nonce += 1;
        assert_ne!(before, block.compute_hash());
    }
}
