// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concrete dogu steps and the pipelines built from them.
//!
//! # Apply
//!
//! | # | Step | Effect |
//! |---|------|--------|
//! | 1 | `ValidateSpec` | version, downgrade, namespace switch and volume size checks |
//! | 2 | `EnsureFinalizer` | adds the dogu finalizer |
//! | 3 | `RegisterDogu` | records the desired version in the local registry |
//! | 4 | `EnsureConfig` | creates the config and sensitive config records |
//! | 5 | `EnsureServiceAccounts` | creates the consumed service accounts |
//! | 6 | `EnsureVolume` | creates the data volume claim |
//! | 7 | `EnsureDeployment` | creates the workload or rolls its image |
//! | 8 | `EnsureService` | creates the network service |
//! | 9 | `AwaitRollout` | scales per `spec.stopped`, pauses until observed |
//! | 10 | `MarkSettled` | records the settled phase and version |
//!
//! # Delete
//!
//! `MarkDeleting` → `RemoveServiceAccounts` (best-effort) → `UnregisterDogu` →
//! `DeleteHealthRecords` → `DeleteConfig` → `DeleteWorkloads` → `RemoveFinalizer`.

// Declares a step struct holding the shared `StepContext`.
macro_rules! context_step {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            ctx: $crate::steps::StepContext,
        }

        impl $name {
            /// Create the step.
            pub fn new(ctx: $crate::steps::StepContext) -> Self {
                Self { ctx }
            }
        }
    };
}

mod apply;
mod delete;

pub use apply::{
    AwaitRollout, EnsureConfig, EnsureDeployment, EnsureFinalizer, EnsureService,
    EnsureServiceAccounts, EnsureVolume, MarkSettled, RegisterDogu, ValidateSpec,
};
pub use delete::{
    DeleteConfig, DeleteHealthRecords, DeleteWorkloads, MarkDeleting, RemoveFinalizer,
    RemoveServiceAccounts, UnregisterDogu,
};

use std::sync::Arc;
use std::time::Duration;

use crate::model::DoguSpec;
use crate::pipeline::Pipeline;
use crate::services::{
    ConfigRepository, DoguRegistry, ServiceAccountManager, StoreConfigRepository,
    StoreDoguRegistry, StoreServiceAccountManager,
};
use crate::step::Step;
use crate::store::Client;

/// Settings of the apply steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Registry prefix of dogu images.
    pub image_registry: String,
    /// Claim size when the spec declares none.
    pub default_volume_size: String,
    /// Port exposed by the dogu service.
    pub service_port: u16,
    /// Delay between rollout checks.
    pub rollout_poll_interval: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            image_registry: "registry.cloudogu.com".to_string(),
            default_volume_size: "2Gi".to_string(),
            service_port: 8080,
            rollout_poll_interval: Duration::from_secs(5),
        }
    }
}

impl ApplyConfig {
    /// Image reference for a dogu spec.
    pub fn image_for(&self, spec: &DoguSpec) -> String {
        format!("{}/{}:{}", self.image_registry, spec.name, spec.version)
    }

    /// Qualified dogu name an image reference was built from.
    pub fn dogu_of_image<'a>(&self, image: &'a str) -> Option<&'a str> {
        image
            .strip_prefix(self.image_registry.as_str())?
            .strip_prefix('/')?
            .rsplit_once(':')
            .map(|(name, _)| name)
    }
}

/// Everything the steps need, shared by all of them.
#[derive(Clone)]
pub struct StepContext {
    /// Store client.
    pub client: Client,
    /// Local dogu registry.
    pub registry: Arc<dyn DoguRegistry>,
    /// Configuration records.
    pub config: Arc<dyn ConfigRepository>,
    /// Service accounts.
    pub accounts: Arc<dyn ServiceAccountManager>,
    /// Apply settings.
    pub settings: ApplyConfig,
}

impl StepContext {
    /// Context with the store-backed collaborators.
    pub fn store_backed(client: Client, settings: ApplyConfig) -> Self {
        Self {
            registry: Arc::new(StoreDoguRegistry::new(client.clone())),
            config: Arc::new(StoreConfigRepository::new(client.clone())),
            accounts: Arc::new(StoreServiceAccountManager::new(client.clone())),
            client,
            settings,
        }
    }
}

/// Install/upgrade/start-stop pipeline.
pub fn apply_pipeline(ctx: &StepContext) -> Pipeline {
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(ValidateSpec::new(ctx.clone())),
        Arc::new(EnsureFinalizer::new(ctx.clone())),
        Arc::new(RegisterDogu::new(ctx.clone())),
        Arc::new(EnsureConfig::new(ctx.clone())),
        Arc::new(EnsureServiceAccounts::new(ctx.clone())),
        Arc::new(EnsureVolume::new(ctx.clone())),
        Arc::new(EnsureDeployment::new(ctx.clone())),
        Arc::new(EnsureService::new(ctx.clone())),
        Arc::new(AwaitRollout::new(ctx.clone())),
        Arc::new(MarkSettled::new(ctx.clone())),
    ];
    Pipeline::apply("dogu-apply", steps)
}

/// Teardown pipeline ending with finalizer removal.
pub fn delete_pipeline(ctx: &StepContext) -> Pipeline {
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(MarkDeleting::new(ctx.clone())),
        Arc::new(RemoveServiceAccounts::new(ctx.clone())),
        Arc::new(UnregisterDogu::new(ctx.clone())),
        Arc::new(DeleteHealthRecords::new(ctx.clone())),
        Arc::new(DeleteConfig::new(ctx.clone())),
        Arc::new(DeleteWorkloads::new(ctx.clone())),
    ];
    Pipeline::delete("dogu-delete", steps, Arc::new(RemoveFinalizer::new(ctx.clone())))
}
