// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dogu Operator - standalone controller process.
//!
//! Reconciles the `Dogu` and `DoguRestart` objects of one namespace, stored
//! in a local SQLite database.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dogu_operator::{Config, OperatorRuntime, SqliteObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dogu_operator=info,dogu_core=info")),
        )
        .init();

    info!("Starting Dogu Operator");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        database = %config.database_path.display(),
        namespace = %config.namespace,
        max_concurrent = config.max_concurrent_reconciles,
        "Configuration loaded"
    );

    info!("Opening object store...");
    let store = SqliteObjectStore::from_path(&config.database_path).await?;
    let pool = store.pool().clone();
    info!("Object store ready");

    let runtime = OperatorRuntime::builder()
        .store(Arc::new(store))
        .config(config)
        .build()?
        .start()
        .await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
