//! Account records and stores
//!
//! `InMemoryAccountStore` for tests and demos, `FileAccountStore` for a
//! JSON snapshot on disk rewritten (temp file, then rename) on every change.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::ports::AccountStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub balance: Decimal,
    /// Overdraft allowance; falls back to the configured default
    #[serde(default)]
    pub credit_limit: Option<Decimal>,
    /// Enrolled credential descriptor
    #[serde(default)]
    pub credential_template: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: impl Into<String>, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: None,
            balance,
            credit_limit: None,
            credential_template: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.credential_template = Some(template.into());
        self
    }

    pub fn with_credit_limit(mut self, limit: Decimal) -> Self {
        self.credit_limit = Some(limit);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.get(id).map(|a| a.clone()))
    }

    async fn balance(&self, id: &str) -> StoreResult<Decimal> {
        self.accounts
            .get(id)
            .map(|a| a.balance)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))
    }

    async fn apply_delta(&self, id: &str, delta: Decimal) -> StoreResult<Decimal> {
        let mut account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;
        account.balance += delta;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    async fn insert(&self, account: Account) -> StoreResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AccountExists(account.id)),
            Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }
}

/// Accounts persisted as one JSON document
#[derive(Debug)]
pub struct FileAccountStore {
    path: PathBuf,
    accounts: RwLock<BTreeMap<String, Account>>,
}

impl FileAccountStore {
    /// Open the store, loading existing accounts if the file exists
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let accounts = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), accounts = accounts.len(), "Account store opened");
        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, accounts: &BTreeMap<String, Account>) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(accounts)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn balance(&self, id: &str) -> StoreResult<Decimal> {
        self.accounts
            .read()
            .await
            .get(id)
            .map(|a| a.balance)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))
    }

    async fn apply_delta(&self, id: &str, delta: Decimal) -> StoreResult<Decimal> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;
        let previous = account.balance;
        account.balance += delta;
        account.updated_at = Utc::now();
        let balance = account.balance;

        if let Err(e) = self.persist(&accounts) {
            // keep memory and disk in agreement
            if let Some(account) = accounts.get_mut(id) {
                account.balance = previous;
            }
            return Err(e);
        }
        Ok(balance)
    }

    /// Both balances change in memory and reach disk in one rewrite
    async fn transfer(&self, from: &str, to: &str, amount: Decimal) -> StoreResult<Decimal> {
        let mut accounts = self.accounts.write().await;
        for id in [from, to] {
            if !accounts.contains_key(id) {
                return Err(StoreError::AccountNotFound(id.to_string()));
            }
        }

        let now = Utc::now();
        let mut balance = Decimal::ZERO;
        for (id, delta) in [(from, -amount), (to, amount)] {
            if let Some(account) = accounts.get_mut(id) {
                account.balance += delta;
                account.updated_at = now;
                if id == from {
                    balance = account.balance;
                }
            }
        }

        if let Err(e) = self.persist(&accounts) {
            for (id, delta) in [(from, amount), (to, -amount)] {
                if let Some(account) = accounts.get_mut(id) {
                    account.balance += delta;
                }
            }
            return Err(e);
        }
        Ok(balance)
    }

    async fn insert(&self, account: Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::AccountExists(account.id));
        }
        let id = account.id.clone();
        accounts.insert(id.clone(), account);
        if let Err(e) = self.persist(&accounts) {
            accounts.remove(&id);
            return Err(e);
        }
        Ok(())
    }
}
