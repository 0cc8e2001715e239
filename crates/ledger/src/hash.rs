//! Hash chain utilities for ledger integrity
//!
//! The block hash is SHA-256 over the canonical JSON of
//! `{index, nonce, previous_hash, timestamp, transactions}`: object keys
//! sorted at every level, no whitespace.

use bipay_core::Transaction;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::block::{Block, GENESIS_PREVIOUS_HASH};
use crate::error::ChainError;

/// Calculate the hash of a block's contents
pub fn calculate_block_hash(
    index: u64,
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
) -> String {
    Preimage::new(index, timestamp, transactions, previous_hash).hash_with_nonce(nonce)
}

/// Check that a hex digest starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Canonical serialization split around the nonce.
///
/// With sorted keys the nonce sits between `index` and `previous_hash`,
/// so the nonce search only re-hashes `head + nonce + tail`.
pub(crate) struct Preimage {
    head: String,
    tail: String,
}

impl Preimage {
    pub(crate) fn new(
        index: u64,
        timestamp: &DateTime<Utc>,
        transactions: &[Transaction],
        previous_hash: &str,
    ) -> Self {
        let head = format!("{{\"index\":{},\"nonce\":", index);
        let tail = format!(
            ",\"previous_hash\":{},\"timestamp\":{},\"transactions\":{}}}",
            json_string(previous_hash),
            canonical_json(timestamp),
            canonical_json(&transactions),
        );
        Self { head, tail }
    }

    pub(crate) fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.head.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.tail.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn json_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Serialize with object keys sorted recursively
fn canonical_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(v) => sort_keys(v).to_string(),
        // Plain data records always serialize; keep the hash total anyway
        Err(_) => Value::Null.to_string(),
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Verify hash chain integrity.
///
/// Checks, in order, for every block: index contiguity, previous-hash
/// linkage, hash recomputation and the proof-of-work prefix. Genesis is
/// checked for shape and hash but is not mined.
pub fn verify_chain(blocks: &[Block], difficulty: usize) -> Result<(), ChainError> {
    let genesis = blocks.first().ok_or(ChainError::Empty)?;

    if genesis.index != 0 {
        return Err(ChainError::InvalidGenesis("index must be 0"));
    }
    if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(ChainError::InvalidGenesis("previous_hash must be \"0\""));
    }
    let calculated = genesis.compute_hash();
    if genesis.hash != calculated {
        return Err(ChainError::InvalidHash {
            index: 0,
            expected: calculated,
            actual: genesis.hash.clone(),
        });
    }

    for (position, pair) in blocks.windows(2).enumerate() {
        let (prev, block) = (&pair[0], &pair[1]);

        if block.index != position as u64 + 1 {
            return Err(ChainError::InvalidIndex {
                position: position + 1,
                actual: block.index,
            });
        }

        if block.previous_hash != prev.hash {
            return Err(ChainError::BrokenLink {
                index: block.index,
                expected: prev.hash.clone(),
                actual: block.previous_hash.clone(),
            });
        }

        let calculated = block.compute_hash();
        if block.hash != calculated {
            return Err(ChainError::InvalidHash {
                index: block.index,
                expected: calculated,
                actual: block.hash.clone(),
            });
        }

        if !meets_difficulty(&block.hash, difficulty) {
            return Err(ChainError::InsufficientWork {
                index: block.index,
                hash: block.hash.clone(),
                difficulty,
            });
        }
    }

    Ok(())
}
