// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable operator runtime.
//!
//! [`OperatorRuntime`] wires an object store to the reconcilers and runs the
//! controller loop on the current tokio runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dogu_operator::{Config, OperatorRuntime, SqliteObjectStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = SqliteObjectStore::from_path(&config.database_path).await?;
//!
//!     let runtime = OperatorRuntime::builder()
//!         .store(Arc::new(store))
//!         .config(config)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use dogu_core::events::{FanoutEventRecorder, StoreEventRecorder, TracingEventRecorder};
use dogu_core::steps::StepContext;
use dogu_core::{Client, DoguReconciler, EventRecorder, ObjectStore, RestartReconciler};

use crate::config::Config;
use crate::controller::{Controller, ControllerConfig};

/// Builder for creating an [`OperatorRuntime`].
#[derive(Default)]
pub struct OperatorRuntimeBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    config: Config,
    recorder: Option<Arc<dyn EventRecorder>>,
}

impl std::fmt::Debug for OperatorRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .field("recorder", &self.recorder.as_ref().map(|_| "..."))
            .finish()
    }
}

impl OperatorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the object store (required).
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the operator configuration.
    ///
    /// Default: [`Config::default`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the event recorder.
    ///
    /// Default: events are logged and stored as `Event` objects.
    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing or the configuration
    /// is invalid.
    pub fn build(self) -> Result<OperatorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        self.config.validate()?;

        Ok(OperatorRuntimeConfig {
            store,
            config: self.config,
            recorder: self.recorder,
        })
    }
}

/// Configuration for an [`OperatorRuntime`].
pub struct OperatorRuntimeConfig {
    store: Arc<dyn ObjectStore>,
    config: Config,
    recorder: Option<Arc<dyn EventRecorder>>,
}

impl std::fmt::Debug for OperatorRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRuntimeConfig")
            .field("store", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl OperatorRuntimeConfig {
    /// Start the runtime, spawning the controller task.
    pub async fn start(self) -> Result<OperatorRuntime> {
        let config = self.config;
        let client = Client::new(self.store);
        let recorder: Arc<dyn EventRecorder> = match self.recorder {
            Some(recorder) => recorder,
            None => Arc::new(
                FanoutEventRecorder::new()
                    .with(Arc::new(TracingEventRecorder))
                    .with(Arc::new(StoreEventRecorder::new(client.clone()))),
            ),
        };

        let ctx = StepContext::store_backed(client.clone(), config.apply());
        let dogus = DoguReconciler::new(ctx, recorder.clone(), config.requeue(), config.resize());
        let restarts = RestartReconciler::new(client.clone(), recorder, config.restart());

        let controller = Controller::new(
            client.clone(),
            dogus,
            restarts,
            ControllerConfig {
                namespace: config.namespace.clone(),
                resync_interval: config.resync_interval,
                max_concurrent: config.max_concurrent_reconciles,
                error_backoff: config.min_backoff,
            },
        );
        let shutdown = controller.shutdown_handle();
        let handle = tokio::spawn(controller.run());

        info!(namespace = %config.namespace, "OperatorRuntime started");

        Ok(OperatorRuntime {
            handle,
            shutdown,
            client,
            config,
        })
    }
}

/// A running operator that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct OperatorRuntime {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
    client: Client,
    config: Config,
}

impl OperatorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> OperatorRuntimeBuilder {
        OperatorRuntimeBuilder::new()
    }

    /// Client over the runtime's object store.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gracefully shut down the runtime.
    ///
    /// Running passes are aborted; every pass is restartable, so the next
    /// start picks up where they left off.
    pub async fn shutdown(self) -> Result<()> {
        info!("OperatorRuntime shutting down...");
        self.shutdown.notify_one();

        match self.handle.await {
            Ok(()) => {
                info!("OperatorRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("OperatorRuntime controller task panicked: {}", e);
                Err(anyhow::anyhow!("controller task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
