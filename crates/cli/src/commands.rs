//! CLI commands

use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use bipay_ledger::{read_blocks, save_snapshot, verify_chain};
use bipay_payments::auth::simulated_descriptor;
use bipay_payments::{Account, AppConfig, PaymentRequest, PaymentResult, StoreError};

use crate::context::AppContext;

/// Demo accounts and opening balances
const DEMO_ACCOUNTS: [(&str, Decimal); 3] = [
    ("alice", dec!(1000)),
    ("bob", dec!(500)),
    ("carol", dec!(2500)),
];

/// Summary of a verified chain snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub blocks: usize,
    pub transactions: usize,
    pub tip: String,
}

/// Open demo accounts; existing ones are left untouched
pub async fn seed_accounts(ctx: &AppContext) -> Result<usize, anyhow::Error> {
    let mut opened = 0;
    for (id, balance) in DEMO_ACCOUNTS {
        let account = Account::new(id, balance)
            .with_display_name(id)
            .with_template(simulated_descriptor(id));
        match ctx.accounts.insert(account).await {
            Ok(()) => opened += 1,
            Err(StoreError::AccountExists(_)) => {}
            Err(e) => return Err(e).context("seeding demo accounts"),
        }
    }
    Ok(opened)
}

/// Send one payment with a freshly issued nonce
pub async fn pay(
    ctx: &AppContext,
    from: &str,
    to: &str,
    amount: Decimal,
    idempotency_key: Option<&str>,
) -> Result<PaymentResult, anyhow::Error> {
    let nonce = ctx.orchestrator.issue_nonce(from);
    let mut request =
        PaymentRequest::new(to, amount, nonce).with_live_sample(simulated_descriptor(from));
    if let Some(key) = idempotency_key {
        request = request.with_idempotency_key(key);
    }
    let result = ctx.orchestrator.process_peer_payment(from, request).await?;
    print_result(from, to, amount, &result);
    Ok(result)
}

/// Run a scripted set of payments end to end
pub async fn demo(ctx: &AppContext, export: Option<&Path>) -> Result<(), anyhow::Error> {
    let opened = seed_accounts(ctx).await?;
    println!("Seeded {} demo accounts", opened);

    println!("\n== Everyday payments ==");
    for (from, to, amount) in [
        ("alice", "bob", dec!(25)),
        ("bob", "carol", dec!(40)),
        ("carol", "alice", dec!(60)),
        ("alice", "carol", dec!(15.50)),
        ("bob", "alice", dec!(12)),
    ] {
        pay(ctx, from, to, amount, None).await?;
    }

    println!("\n== Retried request ==");
    let first = pay(ctx, "carol", "bob", dec!(30), Some("demo-retry-1")).await?;
    let replay = pay(ctx, "carol", "bob", dec!(30), Some("demo-retry-1")).await?;
    println!(
        "   first {} / replay {} (duplicate = {})",
        first.transaction_id, replay.transaction_id, replay.duplicate
    );

    println!("\n== Risky and failing payments ==");
    pay(ctx, "carol", "bob", dec!(2000), None).await?;
    pay(ctx, "bob", "alice", dec!(5000), None).await?;

    ctx.orchestrator.flush_mining().await?;

    println!("\n== Balances ==");
    for (id, _) in DEMO_ACCOUNTS {
        println!("   {:<6} {}", id, ctx.orchestrator.balance(id).await?);
    }

    print_stats(ctx).await;

    if let Some(path) = export {
        let ledger = ctx.orchestrator.ledger();
        let chain = ledger.lock().await;
        save_snapshot(&chain, path)
            .with_context(|| format!("exporting chain to {}", path.display()))?;
        println!("\nChain exported to {}", path.display());
    }
    Ok(())
}

/// Verify a chain snapshot file
pub fn audit(path: &Path, difficulty: usize) -> Result<AuditReport, anyhow::Error> {
    let blocks = read_blocks(path).with_context(|| format!("reading {}", path.display()))?;
    verify_chain(&blocks, difficulty)
        .with_context(|| format!("chain in {} failed verification", path.display()))?;

    let report = AuditReport {
        blocks: blocks.len(),
        transactions: blocks.iter().map(|b| b.transactions.len()).sum(),
        tip: blocks.last().map(|b| b.hash.clone()).unwrap_or_default(),
    };
    info!(blocks = report.blocks, "Chain verified");
    Ok(report)
}

/// Render the effective configuration
pub fn render_config(config: &AppConfig) -> Result<String, anyhow::Error> {
    config.validate()?;
    Ok(toml::to_string_pretty(config)?)
}

pub async fn print_stats(ctx: &AppContext) {
    let stats = ctx.orchestrator.ledger_stats().await;
    let model = ctx.orchestrator.scorer_statistics();
    println!("\n== Ledger ==");
    println!(
        "   blocks: {}  transactions: {}  pending: {}  difficulty: {}  valid: {}",
        stats.block_count, stats.tx_count, stats.pending_count, stats.difficulty, stats.is_valid
    );
    println!("\n== Fraud model ==");
    println!(
        "   {} ({}), contamination {}, threshold {}",
        model.model_type, model.model_status, model.contamination, model.threshold
    );
}

fn print_result(from: &str, to: &str, amount: Decimal, result: &PaymentResult) {
    let marker = if result.duplicate {
        "🔁"
    } else if result.is_committed() {
        "✅"
    } else {
        "❌"
    };
    println!(
        "{} {} -> {} {}: {} [{}]",
        marker, from, to, amount, result.message, result.status
    );
    if let Some(code) = result.decline_code() {
        let hint = result
            .decline
            .and_then(|d| d.remediation())
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        println!("   reason: {code}{hint}");
    }
}
