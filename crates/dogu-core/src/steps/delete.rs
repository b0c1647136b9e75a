// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps of the delete pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::{DOGU_FINALIZER, DeploymentSpec, Dogu, DoguPhase, ServiceSpec, VolumeClaimSpec};
use crate::services::ConfigKind;
use crate::step::Step;

context_step!(
    /// Records the `deleting` phase.
    MarkDeleting
);

#[async_trait]
impl Step for MarkDeleting {
    fn name(&self) -> &'static str {
        "MarkDeleting"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx
            .client
            .update_status_with_retry(dogu, |status| status.phase = DoguPhase::Deleting)
            .await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Removes the service accounts the dogu consumes. Best-effort: the
    /// providing dogu may already be gone.
    RemoveServiceAccounts
);

#[async_trait]
impl Step for RemoveServiceAccounts {
    fn name(&self) -> &'static str {
        "RemoveServiceAccounts"
    }

    fn best_effort(&self) -> bool {
        true
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.accounts.remove(dogu).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Removes the local registry entry.
    UnregisterDogu
);

#[async_trait]
impl Step for UnregisterDogu {
    fn name(&self) -> &'static str {
        "UnregisterDogu"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.registry.unregister(dogu).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Deletes the health record.
    DeleteHealthRecords
);

#[async_trait]
impl Step for DeleteHealthRecords {
    fn name(&self) -> &'static str {
        "DeleteHealthRecords"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.config.delete(dogu, ConfigKind::Health).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Deletes the config and sensitive config records.
    DeleteConfig
);

#[async_trait]
impl Step for DeleteConfig {
    fn name(&self) -> &'static str {
        "DeleteConfig"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.config.delete(dogu, ConfigKind::Dogu).await?;
        self.ctx.config.delete(dogu, ConfigKind::Sensitive).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Deletes the deployment, service and volume claim. Absent objects are
    /// fine.
    DeleteWorkloads
);

#[async_trait]
impl Step for DeleteWorkloads {
    fn name(&self) -> &'static str {
        "DeleteWorkloads"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let client = &self.ctx.client;
        let (namespace, name) = (&dogu.metadata.namespace, &dogu.metadata.name);
        let deployment = client.delete::<DeploymentSpec>(namespace, name).await?;
        let service = client.delete::<ServiceSpec>(namespace, name).await?;
        let claim = client.delete::<VolumeClaimSpec>(namespace, name).await?;
        if deployment || service || claim {
            info!(dogu = %name, deployment, service, claim, "Workloads deleted");
        }
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Releases the dogu finalizer. Always the last delete step.
    RemoveFinalizer
);

#[async_trait]
impl Step for RemoveFinalizer {
    fn name(&self) -> &'static str {
        "RemoveFinalizer"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        match self
            .ctx
            .client
            .update_with_retry(dogu, |d| d.metadata.finalizers.retain(|f| f != DOGU_FINALIZER))
            .await
        {
            Ok(_) => info!(dogu = %dogu.metadata.name, "Finalizer removed"),
            // Already reaped by an earlier pass.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Ok(Duration::ZERO)
    }
}
