//! Background block sealing
//!
//! The orchestrator only enqueues a job when the pending buffer reaches the
//! batch size. The miner task drains the buffer into a candidate under the
//! chain lock, searches for a nonce on the blocking pool without holding
//! the lock, then appends (or aborts) under the lock again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bipay_ledger::{seal_parallel, Block, Blockchain, LedgerError};

use crate::error::PaymentError;
use crate::events::PaymentEvent;
use crate::ports::{EventSink, TransactionRepository};

pub type SharedLedger = Arc<Mutex<Blockchain>>;

#[derive(Debug, Clone)]
pub struct MinerSettings {
    pub beneficiary: String,
    /// Nonce search threads per seal
    pub workers: usize,
    pub queue_capacity: usize,
}

enum MinerCommand {
    Mine,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct MinerTask {
    ledger: SharedLedger,
    repository: Arc<dyn TransactionRepository>,
    events: Arc<dyn EventSink>,
    settings: MinerSettings,
    cancel: Arc<AtomicBool>,
    blocks_mined: Arc<AtomicU64>,
}

pub struct Miner {
    commands: mpsc::Sender<MinerCommand>,
    cancel: Arc<AtomicBool>,
    blocks_mined: Arc<AtomicU64>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    /// Start the miner task. Must be called inside a tokio runtime.
    pub fn spawn(
        ledger: SharedLedger,
        repository: Arc<dyn TransactionRepository>,
        events: Arc<dyn EventSink>,
        settings: MinerSettings,
    ) -> Self {
        let (commands, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let blocks_mined = Arc::new(AtomicU64::new(0));

        let task = MinerTask {
            ledger,
            repository,
            events,
            settings,
            cancel: Arc::clone(&cancel),
            blocks_mined: Arc::clone(&blocks_mined),
        };
        let handle = tokio::spawn(task.run(rx));

        Self {
            commands,
            cancel,
            blocks_mined,
            task: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a mining job without waiting.
    ///
    /// Returns false if the queue is full or closed; a queued job will pick
    /// up the pending transactions anyway.
    pub fn request(&self) -> bool {
        match self.commands.try_send(MinerCommand::Mine) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Mining queue full, job coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Miner stopped, mining request ignored");
                false
            }
        }
    }

    /// Mine whatever is pending, below the batch size or not, and wait for it
    pub async fn seal_pending(&self) -> Result<(), PaymentError> {
        self.commands
            .send(MinerCommand::Mine)
            .await
            .map_err(|_| PaymentError::Internal("miner stopped".to_string()))?;
        self.flush().await
    }

    /// Wait until every job queued before this call has finished
    pub async fn flush(&self) -> Result<(), PaymentError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(MinerCommand::Flush(done))
            .await
            .map_err(|_| PaymentError::Internal("miner stopped".to_string()))?;
        wait.await
            .map_err(|_| PaymentError::Internal("miner stopped before flushing".to_string()))
    }

    /// Cancel any in-progress search and stop the task.
    ///
    /// Transactions of an interrupted candidate go back to pending.
    pub async fn shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.commands.send(MinerCommand::Shutdown).await;

        let handle = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Miner task ended abnormally");
            }
        }
        info!(blocks = self.blocks_mined(), "Miner stopped");
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }
}

impl MinerTask {
    async fn run(self, mut rx: mpsc::Receiver<MinerCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                MinerCommand::Mine => {
                    if self.cancel.load(Ordering::Relaxed) {
                        continue;
                    }
                    match self.mine_once().await {
                        Ok(Some(block)) => self.after_append(&block).await,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Mining job failed"),
                    }
                }
                MinerCommand::Flush(done) => {
                    let _ = done.send(());
                }
                MinerCommand::Shutdown => break,
            }
        }
    }

    async fn mine_once(&self) -> Result<Option<Block>, LedgerError> {
        let (candidate, difficulty) = {
            let mut chain = self.ledger.lock().await;
            let candidate = chain.begin_block(&self.settings.beneficiary, Utc::now())?;
            (candidate, chain.difficulty())
        };
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        info!(
            index = candidate.index,
            txs = candidate.transactions.len(),
            "Sealing block"
        );

        let sealing = candidate.clone();
        let cancel = Arc::clone(&self.cancel);
        let workers = self.settings.workers;
        let sealed = tokio::task::spawn_blocking(move || {
            seal_parallel(&sealing, difficulty, workers, &cancel)
        })
        .await;

        let mut chain = self.ledger.lock().await;
        let block = match sealed {
            Ok(Some(block)) => block,
            Ok(None) => {
                chain.abort_block(candidate);
                return Ok(None);
            }
            Err(e) => {
                error!(error = %e, "Seal task failed");
                chain.abort_block(candidate);
                return Ok(None);
            }
        };

        match chain.append_sealed(block) {
            Ok(appended) => Ok(Some(appended.clone())),
            Err(e) => {
                chain.abort_block(candidate);
                Err(e)
            }
        }
    }

    async fn after_append(&self, block: &Block) {
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);

        let ids: Vec<String> = block.transactions.iter().map(|tx| tx.id.clone()).collect();
        match self.repository.set_ledger_hash(&ids, &block.hash).await {
            Ok(updated) => debug!(updated, hash = %block.hash, "Ledger hash stamped"),
            Err(e) => error!(error = %e, hash = %block.hash, "Failed to stamp ledger hash"),
        }

        if let Err(e) = self.events.publish(PaymentEvent::block_mined(block)).await {
            warn!(error = %e, "Block event publish failed");
        }
    }
}
