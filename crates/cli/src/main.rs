//! BiPay CLI - Main entry point

use std::path::PathBuf;

use anyhow::Context;
use bipay_cli::{commands, AppContext};
use bipay_payments::AppConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bipay")]
#[command(about = "BiPay - P2P payments with fraud screening and a sealed ledger", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed demo accounts and run a scripted set of payments
    Demo {
        /// Write the resulting chain to this JSON file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Verify a chain snapshot (hash links, hashes, proof-of-work)
    Audit {
        /// Chain snapshot file
        #[arg(long)]
        chain: PathBuf,
        /// Override the configured difficulty
        #[arg(long)]
        difficulty: Option<usize>,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Demo { export } => {
            let ctx = AppContext::new(config).await?;
            commands::demo(&ctx, export.as_deref()).await?;
            ctx.close().await?;
        }

        Commands::Audit { chain, difficulty } => {
            let difficulty = difficulty.unwrap_or(config.ledger.difficulty);
            let report = commands::audit(&chain, difficulty)?;
            println!(
                "✅ Chain valid: {} blocks, {} transactions, tip {}",
                report.blocks, report.transactions, report.tip
            );
        }

        Commands::CheckConfig => {
            println!("{}", commands::render_config(&config)?);
        }
    }

    Ok(())
}
