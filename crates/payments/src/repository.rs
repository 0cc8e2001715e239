//! Transaction repositories
//!
//! Records are keyed by id; saving an existing id replaces it. The JSONL
//! repository appends every save as a new line and replays the file on
//! open, so the last line for an id wins.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use bipay_core::{Transaction, TransactionStatus};

use crate::error::{StoreError, StoreResult};
use crate::ports::TransactionRepository;

/// One page of an account's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub pages: usize,
}

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<String, Transaction>,
}

impl Records {
    fn upsert(&mut self, transaction: Transaction) {
        self.by_id.insert(transaction.id.clone(), transaction);
    }

    fn involving(&self, account: &str) -> Vec<&Transaction> {
        let mut matching: Vec<&Transaction> = self
            .by_id
            .values()
            .filter(|tx| tx.involves(account))
            .collect();
        // newest first; id breaks timestamp ties so paging is stable
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }

    /// Committed transactions only; declines never moved funds
    fn history(&self, account: &str, limit: usize) -> Vec<Transaction> {
        self.involving(account)
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Committed)
            .take(limit)
            .cloned()
            .collect()
    }

    fn page(&self, account: &str, page: usize, per_page: usize) -> TransactionPage {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let all = self.involving(account);
        let total = all.len();
        let transactions = all
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect();
        TransactionPage {
            transactions,
            total,
            page,
            per_page,
            pages: total.div_ceil(per_page),
        }
    }

    /// Returns the updated records
    fn stamp(&mut self, ids: &[String], hash: &str) -> Vec<Transaction> {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.by_id.get_mut(id) {
                tx.ledger_hash = Some(hash.to_string());
                updated.push(tx.clone());
            }
        }
        updated
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransactionRepository {
    records: RwLock<Records>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> StoreResult<()> {
        self.records.write().await.upsert(transaction.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.records.read().await.by_id.get(id).cloned())
    }

    async fn history(&self, account: &str, limit: usize) -> StoreResult<Vec<Transaction>> {
        Ok(self.records.read().await.history(account, limit))
    }

    async fn page(
        &self,
        account: &str,
        page: usize,
        per_page: usize,
    ) -> StoreResult<TransactionPage> {
        Ok(self.records.read().await.page(account, page, per_page))
    }

    async fn set_ledger_hash(&self, ids: &[String], hash: &str) -> StoreResult<usize> {
        Ok(self.records.write().await.stamp(ids, hash).len())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.records.read().await.by_id.len())
    }
}

/// Append-only JSONL transaction log with an in-memory index
pub struct JsonlTransactionRepository {
    path: PathBuf,
    records: RwLock<Records>,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTransactionRepository {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut records = Records::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let tx: Transaction =
                    serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    })?;
                records.upsert(tx);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(
            path = %path.display(),
            records = records.by_id.len(),
            "Transaction log opened"
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, transactions: &[Transaction]) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;
        for tx in transactions {
            let json = serde_json::to_string(tx)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for JsonlTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> StoreResult<()> {
        self.append(std::slice::from_ref(transaction)).await?;
        self.records.write().await.upsert(transaction.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.records.read().await.by_id.get(id).cloned())
    }

    async fn history(&self, account: &str, limit: usize) -> StoreResult<Vec<Transaction>> {
        Ok(self.records.read().await.history(account, limit))
    }

    async fn page(
        &self,
        account: &str,
        page: usize,
        per_page: usize,
    ) -> StoreResult<TransactionPage> {
        Ok(self.records.read().await.page(account, page, per_page))
    }

    async fn set_ledger_hash(&self, ids: &[String], hash: &str) -> StoreResult<usize> {
        let updated = self.records.write().await.stamp(ids, hash);
        self.append(&updated).await?;
        Ok(updated.len())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.records.read().await.by_id.len())
    }
}
