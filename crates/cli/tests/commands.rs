//! CLI command tests against an in-memory context

use bipay_cli::{commands, AppContext};
use bipay_payments::{AppConfig, StorageBackend};
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn memory_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.difficulty = 1;
    config
}

#[tokio::test]
async fn test_demo_export_passes_audit() {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("chain.json");

    let ctx = AppContext::new(memory_config()).await.unwrap();
    commands::demo(&ctx, Some(&export)).await.unwrap();
    ctx.close().await.unwrap();

    let report = commands::audit(&export, 1).unwrap();
    assert!(report.blocks >= 1);
    assert!(!report.tip.is_empty());
}

#[tokio::test]
async fn test_audit_rejects_tampered_snapshot() {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("chain.json");

    let ctx = AppContext::new(memory_config()).await.unwrap();
    commands::seed_accounts(&ctx).await.unwrap();
    for _ in 0..5 {
        commands::pay(&ctx, "alice", "bob", dec!(10), None).await.unwrap();
    }
    ctx.orchestrator.flush_mining().await.unwrap();
    {
        let ledger = ctx.orchestrator.ledger();
        let chain = ledger.lock().await;
        bipay_ledger::save_snapshot(&chain, &export).unwrap();
    }
    ctx.close().await.unwrap();

    let mut blocks: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    let tip = blocks.as_array().unwrap().len() - 1;
    blocks[tip]["previous_hash"] = serde_json::json!("f00d");
    std::fs::write(&export, serde_json::to_string(&blocks).unwrap()).unwrap();

    assert!(commands::audit(&export, 1).is_err());
}

#[tokio::test]
async fn test_seeding_is_idempotent() {
    let ctx = AppContext::new(memory_config()).await.unwrap();
    assert_eq!(commands::seed_accounts(&ctx).await.unwrap(), 3);
    assert_eq!(commands::seed_accounts(&ctx).await.unwrap(), 0);
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_file_backend_persists_chain_on_close() {
    let dir = TempDir::new().unwrap();
    let mut config = memory_config();
    config.storage.backend = StorageBackend::File;
    config.storage.data_dir = Some(dir.path().to_path_buf());

    let ctx = AppContext::new(config.clone()).await.unwrap();
    commands::demo(&ctx, None).await.unwrap();
    ctx.close().await.unwrap();

    let chain_path = dir.path().join(bipay_cli::context::CHAIN_FILE);
    assert!(commands::audit(&chain_path, 1).is_ok());

    // reopening loads the verified snapshot and the stored accounts
    let reopened = AppContext::new(config).await.unwrap();
    assert_eq!(commands::seed_accounts(&reopened).await.unwrap(), 0);
    assert!(reopened.orchestrator.ledger_stats().await.is_valid);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_close_seals_partial_batch_into_snapshot() {
    let dir = TempDir::new().unwrap();
    let mut config = memory_config();
    config.storage.backend = StorageBackend::File;
    config.storage.data_dir = Some(dir.path().to_path_buf());

    // demo commits more than one batch but not a multiple of it
    let ctx = AppContext::new(config.clone()).await.unwrap();
    commands::demo(&ctx, None).await.unwrap();
    ctx.close().await.unwrap();

    let reopened = AppContext::new(config).await.unwrap();
    let ledger = reopened.orchestrator.ledger();
    let mut recorded = 0;
    for account in ["alice", "bob", "carol"] {
        let page = reopened.orchestrator.history(account, 1, 100).await.unwrap();
        for tx in page.transactions.iter().filter(|tx| tx.ledger_recorded) {
            let chain = ledger.lock().await;
            let (_, hash) = chain
                .find_transaction(&tx.id)
                .unwrap_or_else(|| panic!("{} missing from the chain", tx.id));
            assert_eq!(tx.ledger_hash.as_deref(), Some(hash));
            recorded += 1;
        }
    }
    assert!(recorded > 0);
    assert_eq!(reopened.orchestrator.ledger_stats().await.pending_count, 0);
    reopened.close().await.unwrap();
}

#[test]
fn test_render_config_round_trips() {
    let rendered = commands::render_config(&AppConfig::default()).unwrap();
    let parsed = AppConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(parsed, AppConfig::default());
}
