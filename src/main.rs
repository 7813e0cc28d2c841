mod api;
mod config;
mod db;
mod fx;
mod mock_fx;
mod payment;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::{
    api::AppState,
    config::{Config, LogFormat},
    db::{PaymentStore, SqliteStore},
    fx::FxClient,
};

#[derive(Parser)]
#[command(author, version, about = "Cross-currency payment service")]
struct Cli {
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the payments API and its workers
    Serve(Config),
    /// Run a stand-in FX service that quotes a fixed rate
    MockFx {
        #[arg(long, env = "MOCK_FX_PORT", default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "1.1")]
        rate: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    config::init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(config) => serve(config).await,
        Command::MockFx { port, rate } => mock_fx::serve(port, rate).await,
    }
}

#[tracing::instrument(skip_all)]
async fn serve(config: Config) -> Result<()> {
    let fx_config = config.fx()?;
    tracing::info!(
        fx_url = %fx_config.base_url,
        max_retries = fx_config.max_retries,
        "fx client configured"
    );

    let rates = Arc::new(FxClient::new(fx_config)?);

    let store: Arc<dyn PaymentStore> = Arc::new(SqliteStore::open(&config.database_path)?);

    let scheduler = worker::start(store.clone(), rates, config.workers);

    let pending = store.pending_ids().await?;
    if !pending.is_empty() {
        tracing::info!(count = pending.len(), "rescheduling pending payments");
    }
    for payment_id in pending {
        scheduler.schedule(payment_id);
    }

    api::serve(config.port, AppState { store, scheduler }).await
}
