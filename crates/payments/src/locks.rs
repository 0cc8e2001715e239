//! Per-account exclusive sections
//!
//! A transfer holds both account locks for its whole read-modify-write.
//! Locks are taken in sorted id order so two transfers over the same pair
//! cannot deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::PaymentError;

#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Both guards of a transfer; released on drop
#[derive(Debug)]
pub struct PairGuard {
    _first: OwnedMutexGuard<()>,
    _second: OwnedMutexGuard<()>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, account: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, account: &str) -> OwnedMutexGuard<()> {
        self.handle(account).lock_owned().await
    }

    pub async fn lock_pair(&self, a: &str, b: &str) -> Result<PairGuard, PaymentError> {
        if a == b {
            return Err(PaymentError::Validation(
                "sender and recipient must differ".to_string(),
            ));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.handle(first).lock_owned().await;
        let second = self.handle(second).lock_owned().await;
        Ok(PairGuard {
            _first: first,
            _second: second,
        })
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_self_pair_rejected() {
        let locks = AccountLocks::new();
        assert!(matches!(
            locks.lock_pair("alice", "alice").await,
            Err(PaymentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_pairs_serialize() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.lock_pair("alice", "bob").await.unwrap();

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock_pair("bob", "carol").await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_pairs_do_not_block() {
        let locks = AccountLocks::new();
        let _ab = locks.lock_pair("alice", "bob").await.unwrap();
        let cd = tokio::time::timeout(Duration::from_millis(100), locks.lock_pair("carol", "dave")).await;
        assert!(cd.is_ok());
    }
}
