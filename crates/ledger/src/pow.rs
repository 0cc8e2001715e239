//! Proof-of-work sealing
//!
//! CPU-bound nonce search. Callers run it off the request path and may
//! cancel it through the shared flag.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::block::{Block, CandidateBlock};
use crate::hash::{meets_difficulty, Preimage};

/// How often (in nonces) the cancel flag is polled
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Search for a nonce whose block hash has `difficulty` leading zero hex chars.
///
/// Returns `None` if `cancel` was raised before a nonce was found, or if the
/// nonce space is exhausted. The candidate is left untouched so the caller
/// can return its transactions to the pending buffer.
#[tracing::instrument(skip(candidate, cancel), fields(index = candidate.index, txs = candidate.transactions.len()))]
pub fn seal(candidate: &CandidateBlock, difficulty: usize, cancel: &AtomicBool) -> Option<Block> {
    let preimage = Preimage::new(
        candidate.index,
        &candidate.timestamp,
        &candidate.transactions,
        &candidate.previous_hash,
    );

    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            tracing::warn!(nonce, "PoW search cancelled");
            return None;
        }

        let hash = preimage.hash_with_nonce(nonce);
        if meets_difficulty(&hash, difficulty) {
            tracing::debug!(nonce, hash = %hash, "PoW search successful");
            return Some(candidate.clone().into_sealed(nonce, hash));
        }

        nonce = nonce.checked_add(1)?;
    }
}

/// Multi-threaded [`seal`]: thread `i` of `threads` tries nonces
/// `i, i + threads, i + 2 * threads, ...` and the first hit stops the rest.
///
/// With several hits in flight the smallest nonce wins.
#[tracing::instrument(skip(candidate, cancel), fields(index = candidate.index, txs = candidate.transactions.len()))]
pub fn seal_parallel(
    candidate: &CandidateBlock,
    difficulty: usize,
    threads: usize,
    cancel: &AtomicBool,
) -> Option<Block> {
    if threads <= 1 {
        return seal(candidate, difficulty, cancel);
    }

    let preimage = Preimage::new(
        candidate.index,
        &candidate.timestamp,
        &candidate.transactions,
        &candidate.previous_hash,
    );
    let found = AtomicBool::new(false);
    let stride = threads as u64;

    let winner = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..stride)
            .map(|offset| {
                let preimage = &preimage;
                let found = &found;
                scope.spawn(move || {
                    let mut nonce = offset;
                    let mut tried: u64 = 0;
                    loop {
                        if tried % CANCEL_CHECK_INTERVAL == 0
                            && (cancel.load(Ordering::Relaxed) || found.load(Ordering::Relaxed))
                        {
                            return None;
                        }

                        let hash = preimage.hash_with_nonce(nonce);
                        if meets_difficulty(&hash, difficulty) {
                            found.store(true, Ordering::Relaxed);
                            return Some((nonce, hash));
                        }

                        nonce = nonce.checked_add(stride)?;
                        tried += 1;
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|h| h.join().ok().flatten())
            .min_by_key(|(nonce, _)| *nonce)
    });

    match winner {
        Some((nonce, hash)) => {
            tracing::debug!(nonce, hash = %hash, threads, "Parallel PoW search successful");
            Some(candidate.clone().into_sealed(nonce, hash))
        }
        None => {
            tracing::warn!(threads, "Parallel PoW search cancelled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate() -> CandidateBlock {
        CandidateBlock {
            index: 1,
            timestamp: Utc::now(),
            transactions: Vec::new(),
            previous_hash: "prev".to_string(),
        }
    }

    #[test]
    fn test_seal_meets_difficulty() {
        let cancel = AtomicBool::new(false);
        let block = seal(&candidate(), 2, &cancel).unwrap();

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_seal_cancelled() {
        let cancel = AtomicBool::new(true);
        assert!(seal(&candidate(), 2, &cancel).is_none());
    }

    #[test]
    fn test_seal_parallel_meets_difficulty() {
        let cancel = AtomicBool::new(false);
        let block = seal_parallel(&candidate(), 2, 4, &cancel).unwrap();

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_seal_parallel_cancelled() {
        let cancel = AtomicBool::new(true);
        assert!(seal_parallel(&candidate(), 3, 2, &cancel).is_none());
    }

    #[test]
    fn test_zero_difficulty_first_nonce() {
        let cancel = AtomicBool::new(false);
        let block = seal(&candidate(), 0, &cancel).unwrap();
        assert_eq!(block.nonce, 0);
    }
}
