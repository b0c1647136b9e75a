// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dogu Core - Reconciliation Engine
//!
//! This crate drives `Dogu` and `DoguRestart` objects towards their declared
//! state. Every pass is a short, restartable function of the stored objects:
//! progress lives in object status, never in memory, so a crash or a
//! concurrent pass at worst repeats idempotent work.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          dogu-operator                                   │
//! │         (SQLite object store, watch-driven work queue, workers)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                │ Dogu                                 │ DoguRestart
//!                ▼                                      ▼
//! ┌───────────────────────────────┐      ┌───────────────────────────────┐
//! │        DoguReconciler         │      │      RestartReconciler        │
//! │  delete │ resize │ apply      │      │  stop → check → start → check │
//! └───────────────────────────────┘      └───────────────────────────────┘
//!     │          │          │                           │
//!     ▼          ▼          ▼                           │
//! ┌────────┐ ┌──────────┐ ┌────────┐                    │
//! │Pipeline│ │AsyncExec.│ │Pipeline│                    │
//! └────────┘ └──────────┘ └────────┘                    │
//!     │          │          │                           │
//!     └──────────┴────┬─────┘                           │
//!                     ▼                                 │
//!              ┌──────────────┐                         │
//!              │RequeueHandler│                         │
//!              └──────────────┘                         │
//!                     │                                 │
//!                     ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Client → ObjectStore (memory / SQLite)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Dogu Pass
//!
//! | Condition | Operation |
//! |-----------|-----------|
//! | deletion timestamp set | delete pipeline, finalizer removed last |
//! | `status.requeuePhase` set | next step of the resize workflow |
//! | declared volume larger than the claim | start the resize workflow |
//! | otherwise | apply pipeline |
//!
//! A pipeline stops at the first error or the first non-zero requeue
//! delay. Steps marked best-effort only log their failure.
//!
//! # Requeue Policy
//!
//! | Outcome | Action | Event |
//! |---------|--------|-------|
//! | error | requeue after `max(delay, backoff)` | `ReasonReconcileFail` (Warning) |
//! | delay, no error | requeue after delay | `Requeue` |
//! | converged | wait for the next change | `ReasonReconcileOK` |
//!
//! Permanent errors (validation, forbidden edits) use the long backoff.
//!
//! # Restart State Machine
//!
//! ```text
//!   new ──► stopping ──► stopped ──► starting ──► completed
//! ```
//!
//! A failed flag write records `failedStop` or `failedStart`, which retry the
//! same action. A missing dogu ends the cycle in `doguNotFound`.
//!
//! Phases only move forward; a pass that read a stale phase cannot undo a
//! later one.
//!
//! # Modules
//!
//! - [`error`]: Error type with retry classification
//! - [`model`]: Resource types, metadata and versions
//! - [`store`]: Object store trait, versioned client, in-memory store
//! - [`events`]: Event recording
//! - [`services`]: Registry, config and service account collaborators
//! - [`step`] / [`pipeline`] / [`steps`]: Step pipelines
//! - [`requeue`]: Outcome to scheduling decision
//! - [`workflow`]: Resumable multi-step workflows (volume resize)
//! - [`reconciler`]: Dogu pass
//! - [`restart`]: Restart pass

#![deny(missing_docs)]

/// Error types with conflict, retry and permanence classification.
pub mod error;

/// Event types and recorders.
pub mod events;

/// Resource model: metadata, dogu and restart specs, infrastructure objects.
pub mod model;

/// Ordered step pipelines.
pub mod pipeline;

/// Dogu reconciliation entry point.
pub mod reconciler;

/// Requeue policy.
pub mod requeue;

/// Restart state machine.
pub mod restart;

/// Collaborators the steps talk to.
pub mod services;

/// The step seam.
pub mod step;

/// Concrete apply and delete steps.
pub mod steps;

/// Object store abstraction and versioned client.
pub mod store;

/// Resumable workflows.
pub mod workflow;

pub use error::{Error, Result};
pub use events::{Event, EventRecorder, EventType};
pub use model::{Dogu, DoguPhase, DoguRestart, DoguSpec, ObjectKey, RestartPhase};
pub use reconciler::DoguReconciler;
pub use requeue::{Action, RequeueConfig, RequeueHandler};
pub use restart::{RestartConfig, RestartReconciler};
pub use store::{Client, MemoryObjectStore, ObjectStore};
