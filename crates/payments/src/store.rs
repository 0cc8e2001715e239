//! Short-lived keyed records
//!
//! [`KeyedStore`] is the capability the orchestrator depends on;
//! [`TtlStore`] backs it with a `DashMap` and a fixed time-to-live.
//! Nonces and idempotency records are typed wrappers over it.

use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::result::PaymentResult;

/// Concurrent keyed store with expiry
pub trait KeyedStore<K, V>: Send + Sync {
    /// Live value for `key`
    fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V>;

    fn put(&self, key: K, value: V, now: DateTime<Utc>);

    /// Insert unless a live entry exists, in which case its value is returned
    fn put_if_absent(&self, key: K, value: V, now: DateTime<Utc>) -> Result<(), V>;

    fn delete(&self, key: &K) -> bool;

    /// Atomic check-and-delete: at most one caller gets the value
    fn take(&self, key: &K, now: DateTime<Utc>) -> Option<V>;

    /// Purge expired entries, returning how many were removed
    fn expire(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Stored<V> {
    value: V,
    issued_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct TtlStore<K: Eq + Hash, V> {
    entries: DashMap<K, Stored<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> TtlStore<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, stored: &Stored<V>, now: DateTime<Utc>) -> bool {
        now - stored.issued_at < self.ttl
    }
}

impl<K, V> KeyedStore<K, V> for TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|stored| self.is_live(stored, now))
            .map(|stored| stored.value.clone())
    }

    fn put(&self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            Stored {
                value,
                issued_at: now,
            },
        );
    }

    fn put_if_absent(&self, key: K, value: V, now: DateTime<Utc>) -> Result<(), V> {
        let stored = Stored {
            value,
            issued_at: now,
        };
        match self.entries.entry(key) {
            Entry::Occupied(existing) if self.is_live(existing.get(), now) => {
                Err(existing.get().value.clone())
            }
            Entry::Occupied(mut expired) => {
                expired.insert(stored);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(stored);
                Ok(())
            }
        }
    }

    fn delete(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    fn take(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        // removed either way; an expired entry is simply gone
        let (_, stored) = self.entries.remove(key)?;
        self.is_live(&stored, now).then_some(stored.value)
    }

    fn expire(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| now - stored.issued_at < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Why a payment nonce was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceRejection {
    #[error("nonce is unknown, expired or already used")]
    Unknown,

    #[error("nonce was issued to a different account")]
    WrongAccount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    pub account: String,
    pub issued_at: DateTime<Utc>,
}

/// Single-use payment nonces bound to the account they were issued for
pub struct NonceStore {
    store: Box<dyn KeyedStore<String, NonceRecord>>,
}

impl NonceStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Box::new(TtlStore::new(ttl)))
    }

    pub fn with_store(store: Box<dyn KeyedStore<String, NonceRecord>>) -> Self {
        Self { store }
    }

    pub fn issue(&self, account: &str, now: DateTime<Utc>) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        self.store.put(
            nonce.clone(),
            NonceRecord {
                account: account.to_string(),
                issued_at: now,
            },
            now,
        );
        tracing::debug!(account, "Payment nonce issued");
        nonce
    }

    /// Consume a nonce. It is gone afterwards whatever the result.
    pub fn consume(
        &self,
        nonce: &str,
        account: &str,
        now: DateTime<Utc>,
    ) -> Result<(), NonceRejection> {
        let record = self
            .store
            .take(&nonce.to_string(), now)
            .ok_or(NonceRejection::Unknown)?;
        if record.account != account {
            return Err(NonceRejection::WrongAccount);
        }
        Ok(())
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.store.expire(now)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyRecord {
    /// First request with this key is still executing
    InFlight { transaction_id: String },
    Completed(Box<PaymentResult>),
}

/// Result of trying to claim an idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyClaim {
    /// The caller owns the key and must `complete` or `release` it
    Claimed,
    InFlight { transaction_id: String },
    Completed(Box<PaymentResult>),
}

type IdempotencyKey = (String, String);

/// Idempotency records keyed by `(sender, client key)`
pub struct IdempotencyStore {
    store: Box<dyn KeyedStore<IdempotencyKey, IdempotencyRecord>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Box::new(TtlStore::new(ttl)))
    }

    pub fn with_store(store: Box<dyn KeyedStore<IdempotencyKey, IdempotencyRecord>>) -> Self {
        Self { store }
    }

    pub fn claim(
        &self,
        sender: &str,
        key: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> IdempotencyClaim {
        let record = IdempotencyRecord::InFlight {
            transaction_id: transaction_id.to_string(),
        };
        match self
            .store
            .put_if_absent((sender.to_string(), key.to_string()), record, now)
        {
            Ok(()) => IdempotencyClaim::Claimed,
            Err(IdempotencyRecord::InFlight { transaction_id }) => {
                IdempotencyClaim::InFlight { transaction_id }
            }
            Err(IdempotencyRecord::Completed(result)) => IdempotencyClaim::Completed(result),
        }
    }

    pub fn complete(&self, sender: &str, key: &str, result: PaymentResult, now: DateTime<Utc>) {
        self.store.put(
            (sender.to_string(), key.to_string()),
            IdempotencyRecord::Completed(Box::new(result)),
            now,
        );
    }

    /// Drop a claim so the key can be used again
    pub fn release(&self, sender: &str, key: &str) {
        self.store.delete(&(sender.to_string(), key.to_string()));
    }

    pub fn get(&self, sender: &str, key: &str, now: DateTime<Utc>) -> Option<IdempotencyRecord> {
        self.store.get(&(sender.to_string(), key.to_string()), now)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.store.expire(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ttl_store_expiry() {
        let store: TtlStore<String, u32> = TtlStore::new(Duration::seconds(60));
        store.put("a".into(), 1, t0());
        store.put("b".into(), 2, t0() + Duration::seconds(50));

        assert_eq!(store.get(&"a".into(), t0() + Duration::seconds(59)), Some(1));
        assert_eq!(store.get(&"a".into(), t0() + Duration::seconds(60)), None);

        assert_eq!(store.expire(t0() + Duration::seconds(70)), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_take_is_single_use() {
        let store: TtlStore<String, u32> = TtlStore::new(Duration::seconds(60));
        store.put("k".into(), 7, t0());

        assert_eq!(store.take(&"k".into(), t0()), Some(7));
        assert_eq!(store.take(&"k".into(), t0()), None);
    }

    #[test]
    fn test_put_if_absent_replaces_expired() {
        let store: TtlStore<String, u32> = TtlStore::new(Duration::seconds(10));
        assert_eq!(store.put_if_absent("k".into(), 1, t0()), Ok(()));
        assert_eq!(store.put_if_absent("k".into(), 2, t0()), Err(1));
        assert_eq!(
            store.put_if_absent("k".into(), 3, t0() + Duration::seconds(11)),
            Ok(())
        );
        assert_eq!(store.get(&"k".into(), t0() + Duration::seconds(11)), Some(3));
    }

    #[test]
    fn test_nonce_single_use_and_bound_to_account() {
        let nonces = NonceStore::new(Duration::minutes(5));
        let nonce = nonces.issue("alice", t0());

        assert_eq!(nonces.consume(&nonce, "alice", t0()), Ok(()));
        assert_eq!(nonces.consume(&nonce, "alice", t0()), Err(NonceRejection::Unknown));

        let other = nonces.issue("alice", t0());
        assert_eq!(nonces.consume(&other, "mallory", t0()), Err(NonceRejection::WrongAccount));
        // burned by the failed attempt
        assert_eq!(nonces.consume(&other, "alice", t0()), Err(NonceRejection::Unknown));
    }

    #[test]
    fn test_nonce_expires() {
        let nonces = NonceStore::new(Duration::minutes(5));
        let nonce = nonces.issue("alice", t0());
        let late = t0() + Duration::minutes(5);
        assert_eq!(nonces.consume(&nonce, "alice", late), Err(NonceRejection::Unknown));
    }

    #[test]
    fn test_concurrent_take_has_one_winner() {
        let store: Arc<TtlStore<String, u32>> = Arc::new(TtlStore::new(Duration::seconds(60)));
        store.put("k".into(), 1, t0());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.take(&"k".to_string(), t0()).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_idempotency_claim_cycle() {
        let store = IdempotencyStore::new(Duration::hours(24));

        assert_eq!(store.claim("alice", "k1", "tx_1", t0()), IdempotencyClaim::Claimed);
        assert_eq!(
            store.claim("alice", "k1", "tx_2", t0()),
            IdempotencyClaim::InFlight {
                transaction_id: "tx_1".to_string()
            }
        );
        // keys are scoped per sender
        assert_eq!(store.claim("bob", "k1", "tx_3", t0()), IdempotencyClaim::Claimed);

        store.release("alice", "k1");
        assert_eq!(store.claim("alice", "k1", "tx_4", t0()), IdempotencyClaim::Claimed);
    }
}
