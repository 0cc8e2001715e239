//! Application context - wires everything together

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use bipay_fraud::AnomalyScorer;
use bipay_ledger::{load_snapshot_or_new, save_snapshot, Blockchain};
use bipay_payments::{
    build_authenticator, AccountStore, AppConfig, Collaborators, FileAccountStore,
    InMemoryAccountStore, InMemoryTransactionRepository, JsonlTransactionRepository,
    StorageBackend, SystemClock, TracingEventSink, TransactionOrchestrator, TransactionRepository,
};

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const TRANSACTIONS_FILE: &str = "transactions.jsonl";
pub const CHAIN_FILE: &str = "chain.json";

/// Application context - one orchestrator plus where its state lives
pub struct AppContext {
    pub config: AppConfig,
    pub orchestrator: TransactionOrchestrator,
    pub accounts: Arc<dyn AccountStore>,
    snapshot_path: Option<PathBuf>,
}

impl AppContext {
    /// Build adapters for the configured storage backend and start the miner
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let difficulty = config.ledger.difficulty;
        let reward = config.ledger.mining_reward;

        let (accounts, repository, ledger, snapshot_path) = match config.storage.backend {
            StorageBackend::Memory => (
                Arc::new(InMemoryAccountStore::new()) as Arc<dyn AccountStore>,
                Arc::new(InMemoryTransactionRepository::new()) as Arc<dyn TransactionRepository>,
                Blockchain::new(difficulty, reward),
                None,
            ),
            StorageBackend::File => {
                let dir = config
                    .storage
                    .data_dir
                    .clone()
                    .context("storage.data_dir is required for the file backend")?;
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("creating data dir {}", dir.display()))?;

                let accounts = FileAccountStore::open(dir.join(ACCOUNTS_FILE))
                    .context("opening account store")?;
                let repository = JsonlTransactionRepository::open(dir.join(TRANSACTIONS_FILE))
                    .context("opening transaction journal")?;
                let chain_path = dir.join(CHAIN_FILE);
                let ledger = load_snapshot_or_new(&chain_path, difficulty, reward)
                    .with_context(|| format!("loading chain snapshot {}", chain_path.display()))?;

                info!(data_dir = %dir.display(), blocks = ledger.blocks().len(), "File storage opened");
                (
                    Arc::new(accounts) as Arc<dyn AccountStore>,
                    Arc::new(repository) as Arc<dyn TransactionRepository>,
                    ledger,
                    Some(chain_path),
                )
            }
        };

        let scorer = Arc::new(AnomalyScorer::new(config.scoring.clone()));
        let fitting = Arc::clone(&scorer);
        let trained = tokio::task::spawn_blocking(move || fitting.warm_up())
            .await
            .context("fraud model fit task failed")?;
        if !trained {
            warn!("Fraud model unavailable, payments will be scored as degraded");
        }

        let collaborators = Collaborators {
            accounts: Arc::clone(&accounts),
            repository,
            authenticator: build_authenticator(&config.auth),
            events: Arc::new(TracingEventSink),
            scorer,
            clock: Arc::new(SystemClock),
        };
        let orchestrator = TransactionOrchestrator::new(&config, ledger, collaborators);

        Ok(Self {
            config,
            orchestrator,
            accounts,
            snapshot_path,
        })
    }

    /// Seal what is still pending, stop the miner and persist the chain (file backend)
    pub async fn close(self) -> anyhow::Result<()> {
        self.orchestrator
            .seal_pending()
            .await
            .context("sealing pending transactions")?;
        self.orchestrator.shutdown().await;

        if let Some(path) = &self.snapshot_path {
            let ledger = self.orchestrator.ledger();
            let chain = ledger.lock().await;
            if !chain.pending().is_empty() {
                warn!(
                    pending = chain.pending().len(),
                    "Unsealed transactions are not part of the snapshot"
                );
            }
            save_snapshot(&chain, path)
                .with_context(|| format!("saving chain snapshot {}", path.display()))?;
        }
        Ok(())
    }
}
