#![allow(dead_code)]

mod config;
mod execution;
mod feeds;
mod models;
mod risk;
mod signals;
mod strategies;
mod telemetry;

use crate::config::Config;
use crate::execution::api_worker::ApiWorker;
use crate::execution::trader::Trader;
use crate::execution::upbit_client::UpbitClient;
use crate::feeds::merger::TickMerger;
use crate::feeds::symbol_manager::SymbolManager;
use crate::feeds::upbit_ws::UpbitIngress;
use crate::signals::indicator_worker::IndicatorWorker;
use crate::telemetry::telegram::TelegramBot;
use crate::telemetry::trade_log::TradeLogWriter;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("==========================================");
    info!("  AUTOCOIN - Upbit KRW spot trading bot");
    info!("==========================================");

    let config = Arc::new(Config::load_or_default());
    if let Err(e) = config.validate() {
        error!("Config validation failed: {e}");
        anyhow::bail!("refusing to start: {e}");
    }

    // Invalid credentials are fatal before any worker spawns.
    let client = match UpbitClient::new(&config.upbit) {
        Ok(client) => client,
        Err(e) => {
            error!("Exchange client init failed: {e}");
            anyhow::bail!("refusing to start: {e}");
        }
    };

    let seed_symbols = config.symbols.seed.clone();
    info!(
        "Strategy: {:?}, seed symbols: {seed_symbols:?}",
        config.strategy.kind
    );

    // === Channels ===
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let (symbol_tx, symbol_rx) = watch::channel(seed_symbols.clone());
    let (unified_tx, _) = broadcast::channel(4096);
    let (merger_control_tx, merger_control_rx) = mpsc::channel(64);
    let (order_tx, order_rx) = mpsc::channel(1024);
    let (resp_tx, resp_rx) = mpsc::channel(1024);
    let (command_tx, command_rx) = mpsc::channel(64);
    let (notify_tx, notify_rx) = mpsc::channel(1024);
    let (db_tx, db_rx) = mpsc::channel(1024);

    // Shared buyable set: written by the indicator worker, read by the
    // symbol manager.
    let buyable = Arc::new(DashMap::new());

    // === Workers ===
    TickMerger::start(
        unified_tx.clone(),
        merger_control_rx,
        shutdown_tx.subscribe(),
    );

    let ingress = UpbitIngress::new(
        config.upbit.ws_url.clone(),
        config.websocket.clone(),
        merger_control_tx,
    );
    ingress.start(symbol_rx.clone(), &shutdown_tx);
    info!("Ingress started ({:?})", config.websocket.channels);

    IndicatorWorker::new(config.signal.clone(), buyable.clone())
        .start(unified_tx.subscribe(), shutdown_tx.subscribe());

    SymbolManager::new(
        config.symbols.clone(),
        config.upbit.rest_url.clone(),
        buyable,
        symbol_tx,
    )
    .start(shutdown_tx.subscribe());

    ApiWorker::new(client).start(
        order_rx,
        resp_tx,
        notify_tx.clone(),
        shutdown_tx.subscribe(),
    );

    let trade_log = TradeLogWriter::open(&config.db_path)?;
    trade_log.start(db_rx, shutdown_tx.subscribe());

    TelegramBot::start(&config.telegram, command_tx, notify_rx, &shutdown_tx);

    let trader = Trader::new(
        config.clone(),
        seed_symbols,
        order_tx,
        notify_tx,
        db_tx,
        shutdown_tx.clone(),
    );
    let trader_handle = tokio::spawn(trader.run(
        unified_tx.subscribe(),
        command_rx,
        resp_rx,
        symbol_rx,
        shutdown_tx.subscribe(),
    ));

    info!("=== AUTOCOIN running ===");
    info!("Press Ctrl+C to shut down.");

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping workers...");
            let _ = shutdown_tx.send(());
        }
        _ = shutdown_rx.recv() => {
            info!("Internal shutdown requested");
        }
    }

    // Bounded grace period for the trader to finish its iteration.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), trader_handle).await;
    info!("AUTOCOIN shutdown complete");
    Ok(())
}
