// src/main.rs
use crate::config::AppConfig;
use crate::connectors::ftx::FtxGateway;
use crate::connectors::messages::Channel;
use crate::connectors::stream::{MarketStream, StreamConfig};
use crate::connectors::traits::MarketData;
use crate::core::commands::{run_command_loop, Command};
use crate::core::executor::{ExecutionEngine, ExecutorConfig};
use crate::core::planner::{PlannerConfig, PositionPlanner};
use crate::storage::FileStore;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod connectors;
mod core;
mod error;
mod orderbook;
mod storage;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "chaser.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(file_writer)
        .init();

    let cfg = AppConfig::new()?;

    println!("========================================");
    println!("       THE CHASER - v0.1.0");
    println!("========================================");
    println!("Endpoint:   {}", cfg.ws_url);
    println!("Aggression: {}", cfg.execution.aggression);
    println!("========================================");

    let stream = MarketStream::new(StreamConfig {
        url: cfg.ws_url.clone(),
        api_key: Some(cfg.api_key.clone()),
        api_secret: Some(cfg.api_secret.clone()),
        subaccount: cfg.subaccount.clone(),
    });
    stream.connect().await?;
    // Account channels stay up for the life of the process; per-market
    // orderbook subscriptions come and go with execution sessions.
    stream.subscribe(Channel::Orders, None).await?;
    stream.subscribe(Channel::Fills, None).await?;

    let gateway = Arc::new(FtxGateway::new(
        cfg.api_key.clone(),
        cfg.api_secret.clone(),
        cfg.subaccount.clone(),
    ));
    let store = Arc::new(FileStore::new(
        cfg.targets_file.clone(),
        cfg.reports_file.clone(),
    ));
    let engine = ExecutionEngine::new(
        Arc::new(stream.clone()),
        gateway.clone(),
        ExecutorConfig {
            max_session: Duration::from_secs(cfg.execution.max_session_secs),
            ..ExecutorConfig::default()
        },
    );
    let planner = PositionPlanner::new(
        gateway,
        store,
        engine,
        PlannerConfig {
            aggression: cfg.execution.aggression,
        },
    );

    // One-shot run: queue a single Execute and let the loop drain it; a bus
    // consumer would keep the sender alive and feed commands instead.
    let (tx, rx) = mpsc::channel(16);
    tx.send(Command::Execute).await?;
    drop(tx);
    run_command_loop(&planner, rx).await;

    stream.close();
    info!("shutdown complete");
    Ok(())
}
