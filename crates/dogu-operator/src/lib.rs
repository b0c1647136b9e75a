// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dogu Operator - Controller Host
//!
//! Hosts the reconcilers of `dogu-core`: persists objects in SQLite, turns
//! store changes into work items and runs passes on a bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  watch   ┌───────────┐  pop   ┌──────────────────────┐
//! │ SqliteObjectStore │ ──────► │ WorkQueue │ ─────► │ workers (JoinSet)     │
//! │  objects table    │         │ dedup +   │        │ DoguReconciler        │
//! │  version counter  │ ◄────── │ deadlines │ ◄───── │ RestartReconciler     │
//! └──────────────────┘  writes  └───────────┘ requeue└──────────────────────┘
//! ```
//!
//! # Configuration
//!
//! All settings come from `DOGU_OPERATOR_*` environment variables, see
//! [`Config::from_env`]. A `.env` file is honoured by the binary.
//!
//! # Embedding
//!
//! [`OperatorRuntime`] runs the controller inside an existing tokio
//! application against any [`dogu_core::ObjectStore`].

#![deny(missing_docs)]

/// Environment-driven configuration.
pub mod config;

/// Watch-driven controller loop.
pub mod controller;

/// Operator error type.
pub mod error;

/// Delaying work queue.
pub mod queue;

/// Embeddable runtime.
pub mod runtime;

/// SQLite object store.
pub mod sqlite;

pub use config::{Config, ConfigError};
pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};
pub use queue::WorkQueue;
pub use runtime::OperatorRuntime;
pub use sqlite::SqliteObjectStore;
