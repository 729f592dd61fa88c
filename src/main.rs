mod analytics;
mod config;
mod controller;
mod entities;
mod http;
mod ledger;
mod models;
mod profile;
mod rpc;
mod session;
mod state;
#[cfg(test)]
mod testing;
mod transfers;

use std::sync::Arc;
use std::time::Duration;

use crate::analytics::AnalyticsStore;
use crate::config::{ApiConfig, DatabaseConfig};
use crate::controller::ConsistencyController;
use crate::rpc::{FlowAccessClient, RpcClient, WalletBridge};
use crate::session::{IdentityWatcher, WalletSession};
use crate::state::{ApiCache, AppState};
use crate::transfers::{AmountBounds, TransferLimits, TransferService};
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    let contract = config.chain.contract_address()?;

    let analytics = match &config.database {
        Some(database) => match connect_analytics(database).await {
            Ok(connection) => AnalyticsStore::new(Some(Arc::new(connection))),
            Err(err) => {
                warn!("Analytics disabled: {err:#}");
                AnalyticsStore::disabled()
            }
        },
        None => AnalyticsStore::disabled(),
    };

    let access_rpc = RpcClient::new(&config.chain.access_url, config.chain.request_timeout())
        .context("Failed to initialize access node client")?;
    info!(
        "Using access node {} with {:?} request timeout",
        config.chain.access_url,
        access_rpc.timeout()
    );
    let ledger = Arc::new(FlowAccessClient::new(
        access_rpc,
        contract.clone(),
        config.controller.finality_poll_interval(),
    ));
    let bridge_rpc = RpcClient::new(&config.wallet.bridge_url, config.wallet.request_timeout())
        .context("Failed to initialize wallet bridge client")?;
    let wallet = Arc::new(WalletBridge::new(bridge_rpc));

    let cache = Arc::new(ApiCache::new(&config.cache));
    let controller = Arc::new(ConsistencyController::new(
        ledger.clone(),
        ledger.clone(),
        wallet.clone(),
        Arc::clone(&cache),
        contract.clone(),
        config.controller.clone(),
    ));
    let session = Arc::new(WalletSession::new(
        wallet.clone(),
        Arc::clone(&controller),
        analytics.clone(),
    ));

    let (tip_minimum, tip_maximum) = config.transfers.tip_bounds()?;
    let transfers = Arc::new(TransferService::new(
        ledger.clone(),
        ledger.clone(),
        wallet.clone(),
        Arc::clone(&cache),
        contract,
        session.subscribe(),
        TransferLimits {
            tip_bounds: AmountBounds {
                minimum: tip_minimum,
                maximum: Some(tip_maximum),
            },
            withdraw_minimum: config.transfers.withdraw_minimum()?,
            max_message_len: config.transfers.max_message_len,
            finality_timeout: config.controller.finality_timeout(),
        },
    ));

    let app_state = AppState::new(
        ledger,
        Arc::clone(&controller),
        Arc::clone(&session),
        transfers,
        analytics,
        Arc::clone(&cache),
    );

    let watcher = IdentityWatcher::new(
        Arc::clone(&session),
        wallet,
        config.wallet.poll_interval(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_handle = tokio::spawn(async move {
        if let Err(err) = watcher.run(shutdown_rx).await {
            error!("Identity watcher terminated with error: {err}");
        }
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("FlowTip API listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = watcher_handle.await {
        error!("Identity watcher join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_analytics(config: &DatabaseConfig) -> Result<sea_orm::DatabaseConnection> {
    let database = connect_database(config).await?;
    run_migrations(&database).await?;
    info!("Analytics database ready");
    Ok(database)
}

async fn connect_database(config: &DatabaseConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
