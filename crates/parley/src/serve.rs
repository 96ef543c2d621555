// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve` command implementation.
//!
//! Opens SQLite storage (running migrations), opens the broker over the same
//! database (returning unacked deliveries to their queues), wires the
//! dispatcher and connection manager, and serves the gateway until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_broker::SqliteBroker;
use parley_config::model::{LogFormat, LoggingConfig};
use parley_config::ParleyConfig;
use parley_core::{ParleyError, PluginAdapter, SnowflakeGenerator};
use parley_gateway::{
    interceptor, server, ConnectionManager, ConnectionSettings, Dispatcher, GatewaySettings,
    GatewayState, HealthState, HmacTokenResolver,
};
use parley_storage::SqliteStorage;
use tracing::{info, warn};

use crate::shutdown;

/// How long connections get to hand back their deliveries on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the `parley serve` command.
pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "starting parley serve");

    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;
    info!(path = %config.storage.database_path, "storage ready");

    let broker = Arc::new(SqliteBroker::open(storage.database()?, config.broker.clone()).await?);
    let ids = Arc::new(SnowflakeGenerator::new(config.ids.node_id)?);
    let interceptor = interceptor::from_config(&config.interceptor);
    info!(interceptor = interceptor.name(), "content interceptor ready");

    if config.auth.token_secret.is_none() {
        warn!("auth.token_secret is not set; every connection will be rejected");
    }
    let identity = Arc::new(HmacTokenResolver::new(config.auth.token_secret.as_deref()));

    let dispatcher = Dispatcher::new(
        storage.clone(),
        storage.clone(),
        broker.clone(),
        ids,
        interceptor,
    );
    let connections = ConnectionManager::new(
        dispatcher,
        broker.clone(),
        ConnectionSettings::from(&config.connection),
    );
    let state = GatewayState {
        connections,
        identity,
        messages: storage.clone(),
        sessions: storage.clone(),
        settings: Arc::new(GatewaySettings::new(&config.server, &config.broker)),
        health: HealthState {
            start_time: Instant::now(),
            components: vec![storage.clone(), broker.clone()],
        },
    };

    let connections = state.connections.clone();
    let cancel = shutdown::install_signal_handler();
    let listener = server::bind(&config.server).await?;
    server::serve(listener, state, cancel).await?;

    info!("gateway stopped, shutting down");
    shutdown::drain_connections(&connections, DRAIN_TIMEOUT).await;
    if let Err(e) = broker.shutdown().await {
        warn!(error = %e, "broker shutdown failed");
    }
    storage.shutdown().await?;
    info!("parley stopped");
    Ok(())
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={},warn", config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
