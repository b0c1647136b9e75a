// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborators the pipeline steps delegate to.
//!
//! Each collaborator is a trait so steps can be tested against failing doubles.
//! The bundled implementations keep their state as objects in the store.

mod accounts;
mod config;
mod registry;

pub use accounts::StoreServiceAccountManager;
pub use config::StoreConfigRepository;
pub use registry::StoreDoguRegistry;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Dogu;

/// Local registry of installed dogu versions.
#[async_trait]
pub trait DoguRegistry: Send + Sync {
    /// Record the dogu's desired version as installed. Idempotent.
    async fn register(&self, dogu: &Dogu) -> Result<()>;

    /// Remove the dogu's registry entry. Absent entries are fine.
    async fn unregister(&self, dogu: &Dogu) -> Result<()>;

    /// Whether `version` is the registered version of `dogu`.
    async fn is_registered(&self, dogu: &Dogu, version: &str) -> Result<bool>;
}

/// Kind of configuration record a dogu owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    /// Regular configuration.
    Dogu,
    /// Secrets.
    Sensitive,
    /// Health check results.
    Health,
}

impl ConfigKind {
    /// Name of the record for the given dogu.
    pub fn record_name(&self, dogu: &str) -> String {
        match self {
            Self::Dogu => format!("{dogu}-config"),
            Self::Sensitive => format!("{dogu}-sensitive-config"),
            Self::Health => format!("{dogu}-health"),
        }
    }
}

/// Configuration records of dogus.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Create the record if it does not exist.
    async fn ensure(&self, dogu: &Dogu, kind: ConfigKind) -> Result<()>;

    /// Delete the record. Absent records are fine.
    async fn delete(&self, dogu: &Dogu, kind: ConfigKind) -> Result<()>;
}

/// Service accounts other dogus provide to a dogu.
#[async_trait]
pub trait ServiceAccountManager: Send + Sync {
    /// Create every account the dogu consumes. Idempotent.
    async fn create(&self, dogu: &Dogu) -> Result<()>;

    /// Remove every account the dogu consumes.
    async fn remove(&self, dogu: &Dogu) -> Result<()>;
}
