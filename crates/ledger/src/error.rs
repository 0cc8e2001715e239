//! Ledger errors

use thiserror::Error;

/// Errors that can occur in ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Transaction field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("Duplicate transaction id: {0}")]
    DuplicateTransaction(String),

    #[error("Pending buffer is full ({0} transactions)")]
    PendingFull(usize),

    #[error("A candidate block is already being sealed")]
    CandidateInFlight,

    #[error("No candidate block is in flight")]
    NoCandidate,

    #[error("Sealed block {index} does not extend the chain tip: {reason}")]
    StaleBlock { index: u64, reason: String },

    #[error("Chain integrity violation: {0}")]
    Integrity(#[from] ChainError),

    #[error("Core record error: {0}")]
    Core(#[from] bipay_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors in hash chain verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain is empty (missing genesis block)")]
    Empty,

    #[error("Genesis block malformed: {0}")]
    InvalidGenesis(&'static str),

    #[error("Invalid index at position {position}: got {actual}")]
    InvalidIndex { position: usize, actual: u64 },

    #[error("Broken link at block {index}: expected previous_hash '{expected}', got '{actual}'")]
    BrokenLink {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash at block {index}: expected '{expected}', got '{actual}'")]
    InvalidHash {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("Block {index} hash '{hash}' lacks {difficulty} leading zeros")]
    InsufficientWork {
        index: u64,
        hash: String,
        difficulty: usize,
    },
}
