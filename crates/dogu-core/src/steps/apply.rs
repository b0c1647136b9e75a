// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps of the apply pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    DOGU_FINALIZER, DOGU_LABEL, Deployment, DeploymentSpec, Dogu, DoguPhase, DoguVersion,
    ObjectMeta, Quantity, Service, ServiceSpec, VolumeClaim, VolumeClaimSpec,
};
use crate::services::ConfigKind;
use crate::step::Step;

fn owned_meta(dogu: &Dogu) -> ObjectMeta {
    ObjectMeta::new(&dogu.metadata.namespace, &dogu.metadata.name)
        .with_label(DOGU_LABEL, &dogu.metadata.name)
}

fn desired_replicas(dogu: &Dogu) -> i32 {
    if dogu.spec.stopped { 0 } else { 1 }
}

context_step!(
    /// Rejects specs that cannot be applied: unparseable versions, downgrades
    /// without `forceUpgrade`, namespace switches without
    /// `allowNamespaceSwitch`, and unparseable volume sizes.
    ValidateSpec
);

#[async_trait]
impl Step for ValidateSpec {
    fn name(&self) -> &'static str {
        "ValidateSpec"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let spec = &dogu.spec;
        let desired = spec.parsed_version()?;

        if !dogu.status.installed_version.is_empty() {
            let installed: DoguVersion = dogu.status.installed_version.parse()?;
            if desired < installed && !spec.upgrade_config.force_upgrade {
                return Err(Error::validation(
                    "spec.version",
                    format!(
                        "downgrade from {installed} to {desired} requires upgradeConfig.forceUpgrade"
                    ),
                ));
            }
        }

        if let Some(size) = &spec.resources.data_volume_size {
            size.parse::<Quantity>()?;
        }

        if !spec.upgrade_config.allow_namespace_switch
            && let Some(deployment) = self
                .ctx
                .client
                .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
                .await?
            && let Some(running) = self.ctx.settings.dogu_of_image(&deployment.spec.image)
            && running != spec.name
        {
            return Err(Error::validation(
                "spec.name",
                format!(
                    "switching from {running} to {} requires upgradeConfig.allowNamespaceSwitch",
                    spec.name
                ),
            ));
        }

        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Adds the dogu finalizer.
    EnsureFinalizer
);

#[async_trait]
impl Step for EnsureFinalizer {
    fn name(&self) -> &'static str {
        "EnsureFinalizer"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        if dogu.metadata.has_finalizer(DOGU_FINALIZER) {
            return Ok(Duration::ZERO);
        }
        self.ctx
            .client
            .update_with_retry(dogu, |d| {
                if !d.metadata.has_finalizer(DOGU_FINALIZER) {
                    d.metadata.finalizers.push(DOGU_FINALIZER.to_string());
                }
            })
            .await?;
        debug!(dogu = %dogu.metadata.name, "Finalizer added");
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Records the desired version in the local registry.
    RegisterDogu
);

#[async_trait]
impl Step for RegisterDogu {
    fn name(&self) -> &'static str {
        "RegisterDogu"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.registry.register(dogu).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Creates the config and sensitive config records.
    EnsureConfig
);

#[async_trait]
impl Step for EnsureConfig {
    fn name(&self) -> &'static str {
        "EnsureConfig"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.config.ensure(dogu, ConfigKind::Dogu).await?;
        self.ctx.config.ensure(dogu, ConfigKind::Sensitive).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Creates the service accounts the dogu consumes.
    EnsureServiceAccounts
);

#[async_trait]
impl Step for EnsureServiceAccounts {
    fn name(&self) -> &'static str {
        "EnsureServiceAccounts"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        self.ctx.accounts.create(dogu).await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Creates the data volume claim. Growing an existing claim is the resize
    /// workflow's job.
    EnsureVolume
);

#[async_trait]
impl Step for EnsureVolume {
    fn name(&self) -> &'static str {
        "EnsureVolume"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let client = &self.ctx.client;
        if client
            .get_opt::<VolumeClaimSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
            .is_some()
        {
            return Ok(Duration::ZERO);
        }

        let requested = dogu
            .spec
            .resources
            .data_volume_size
            .clone()
            .unwrap_or_else(|| self.ctx.settings.default_volume_size.clone());
        let claim = VolumeClaim::new(owned_meta(dogu), VolumeClaimSpec { requested });
        match client.create(&claim).await {
            Ok(_) | Err(Error::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
        info!(dogu = %dogu.metadata.name, size = %claim.spec.requested, "Volume claim created");
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Creates the workload, or rolls its image when the version changed.
    /// Records `installing` or `upgrading`.
    EnsureDeployment
);

#[async_trait]
impl Step for EnsureDeployment {
    fn name(&self) -> &'static str {
        "EnsureDeployment"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let client = &self.ctx.client;
        let image = self.ctx.settings.image_for(&dogu.spec);

        let phase = match client
            .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
        {
            None => {
                let deployment = Deployment::new(
                    owned_meta(dogu),
                    DeploymentSpec {
                        replicas: desired_replicas(dogu),
                        image: image.clone(),
                    },
                );
                match client.create(&deployment).await {
                    Ok(_) | Err(Error::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e),
                }
                info!(dogu = %dogu.metadata.name, %image, "Deployment created");
                DoguPhase::Installing
            }
            Some(existing) if existing.spec.image != image => {
                client
                    .update_spec_with_retry(&existing, |spec| spec.image = image.clone())
                    .await?;
                info!(
                    dogu = %dogu.metadata.name,
                    from = %existing.spec.image,
                    to = %image,
                    "Deployment image rolled"
                );
                DoguPhase::Upgrading
            }
            Some(_) => return Ok(Duration::ZERO),
        };

        client
            .update_status_with_retry(dogu, |status| status.phase = phase)
            .await?;
        Ok(Duration::ZERO)
    }
}

context_step!(
    /// Creates the network service selecting the dogu's workload.
    EnsureService
);

#[async_trait]
impl Step for EnsureService {
    fn name(&self) -> &'static str {
        "EnsureService"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let client = &self.ctx.client;
        if client
            .get_opt::<ServiceSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
            .is_some()
        {
            return Ok(Duration::ZERO);
        }

        let selector = BTreeMap::from([(DOGU_LABEL.to_string(), dogu.metadata.name.clone())]);
        let service = Service::new(
            owned_meta(dogu),
            ServiceSpec {
                selector,
                port: self.ctx.settings.service_port,
            },
        );
        match client.create(&service).await {
            Ok(_) | Err(Error::AlreadyExists { .. }) => Ok(Duration::ZERO),
            Err(e) => Err(e),
        }
    }
}

context_step!(
    /// Scales the workload to 0 or 1 per `spec.stopped` and pauses the
    /// pipeline until the observed replicas match.
    AwaitRollout
);

#[async_trait]
impl Step for AwaitRollout {
    fn name(&self) -> &'static str {
        "AwaitRollout"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let client = &self.ctx.client;
        let desired = desired_replicas(dogu);
        let mut deployment = client
            .get::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?;

        if deployment.spec.replicas != desired {
            deployment = client
                .update_spec_with_retry(&deployment, |spec| spec.replicas = desired)
                .await?;
            debug!(dogu = %dogu.metadata.name, replicas = desired, "Deployment scaled");
        }

        let observed = &deployment.status;
        let converged = if dogu.spec.stopped {
            observed.replicas == 0 && observed.ready_replicas == 0
        } else {
            observed.ready_replicas >= desired
        };
        if converged {
            return Ok(Duration::ZERO);
        }

        let stopping = dogu.spec.stopped;
        client
            .update_status_with_retry(dogu, |status| {
                status.phase = match (stopping, status.phase) {
                    (true, _) => DoguPhase::Stopping,
                    (false, p @ (DoguPhase::Installing | DoguPhase::Upgrading)) => p,
                    (false, _) => DoguPhase::Starting,
                };
            })
            .await?;
        debug!(
            dogu = %dogu.metadata.name,
            desired,
            ready = observed.ready_replicas,
            "Waiting for rollout"
        );
        Ok(self.ctx.settings.rollout_poll_interval)
    }
}

context_step!(
    /// Records the settled phase, version and stopped flag.
    MarkSettled
);

#[async_trait]
impl Step for MarkSettled {
    fn name(&self) -> &'static str {
        "MarkSettled"
    }

    async fn run(&self, dogu: &Dogu) -> Result<Duration> {
        let stopped = dogu.spec.stopped;
        let version = dogu.spec.version.clone();
        let phase = if stopped {
            DoguPhase::Stopped
        } else {
            DoguPhase::Installed
        };
        self.ctx
            .client
            .update_status_with_retry(dogu, |status| {
                status.phase = phase;
                status.stopped = stopped;
                status.installed_version = version.clone();
            })
            .await?;
        Ok(Duration::ZERO)
    }
}
