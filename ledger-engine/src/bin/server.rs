//! Ledger server binary
//!
//! Boundary-layer stub: loads configuration, opens the ledger, and waits
//! for shutdown. Transport wiring belongs to the coordinating service.

use ledger_engine::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting BankRail ledger server");

    // Load configuration: file path from argv, env overrides otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let ledger = Ledger::open(config)?;
    let stats = ledger.stats()?;
    tracing::info!(
        accounts = stats.total_accounts,
        transactions = stats.total_transactions,
        "Ledger opened"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    Ok(())
}
