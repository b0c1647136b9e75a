// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume resize workflow.
//!
//! Growing a data volume needs the workload scaled down while the storage
//! layer expands the claim, which takes several passes:
//!
//! | State | Action | Next |
//! |-------|--------|------|
//! | `ScaleDown` | record the original replica count once, scale to 0 | `EditPVC` |
//! | `EditPVC` | set the claim request to the target size | `WaitForResize` |
//! | `WaitForResize` | poll capacity and the resize-pending condition | `ScaleUp` |
//! | `ScaleUp` | restore the original replica count (0 if stopped) | `Finished` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{AsyncExecutor, AsyncStep, FINISHED};
use crate::error::{Error, Result};
use crate::model::{
    DeploymentSpec, Dogu, DoguPhase, DoguStatus, Quantity, ResizeParams, VolumeClaimSpec,
};
use crate::store::Client;

/// Scale-down state.
pub const SCALE_DOWN: &str = "ScaleDown";
/// Claim edit state.
pub const EDIT_PVC: &str = "EditPVC";
/// Capacity polling state.
pub const WAIT_FOR_RESIZE: &str = "WaitForResize";
/// Scale-up state.
pub const SCALE_UP: &str = "ScaleUp";

/// Resize workflow settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeConfig {
    /// Delay between capacity polls.
    pub poll_interval: Duration,
    /// Delay before the pass following a successful step.
    pub step_interval: Duration,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            step_interval: Duration::from_secs(1),
        }
    }
}

/// Build the resize executor.
pub fn resize_workflow(client: Client, config: ResizeConfig) -> AsyncExecutor {
    let steps: Vec<Arc<dyn AsyncStep>> = vec![
        Arc::new(ScaleDown {
            client: client.clone(),
        }),
        Arc::new(EditPvc {
            client: client.clone(),
        }),
        Arc::new(WaitForResize {
            client: client.clone(),
            poll_interval: config.poll_interval,
        }),
        Arc::new(ScaleUp {
            client: client.clone(),
        }),
    ];
    AsyncExecutor::new("volume-resize", client, steps)
        .with_phases(DoguPhase::Resizing, DoguPhase::ResizeFailed)
        .with_step_interval(config.step_interval)
        .with_param_cleanup(|status: &mut DoguStatus| status.resize = None)
}

/// Target size if the dogu's data volume has to grow.
///
/// Returns `Ok(None)` when no size is declared, the claim does not exist yet,
/// or the claim already requests at least the declared size. Unparseable
/// sizes and shrink requests are validation errors.
pub async fn required_resize(client: &Client, dogu: &Dogu) -> Result<Option<String>> {
    let Some(declared) = dogu.spec.resources.data_volume_size.as_deref() else {
        return Ok(None);
    };
    let target: Quantity = declared.parse()?;
    let Some(claim) = client
        .get_opt::<VolumeClaimSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
        .await?
    else {
        return Ok(None);
    };
    let current: Quantity = claim.spec.requested.parse()?;

    if target < current {
        return Err(Error::validation(
            "spec.resources.dataVolumeSize",
            format!("cannot shrink volume from {current} to {target}"),
        ));
    }
    Ok((target > current).then(|| target.to_string()))
}

/// Record the resize parameters for `target` on a status.
pub fn prepare(status: &mut DoguStatus, target: &str) {
    status.resize = Some(ResizeParams {
        target_size: target.to_string(),
        original_replicas: None,
    });
}

fn params(dogu: &Dogu) -> Result<&ResizeParams> {
    dogu.status
        .resize
        .as_ref()
        .ok_or_else(|| Error::validation("status.resize", "no resize parameters recorded"))
}

async fn scale(client: &Client, dogu: &Dogu, replicas: i32) -> Result<()> {
    let Some(deployment) = client
        .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
        .await?
    else {
        return Ok(());
    };
    client
        .update_spec_with_retry(&deployment, |spec| spec.replicas = replicas)
        .await?;
    debug!(dogu = %dogu.metadata.name, replicas, "Deployment scaled");
    Ok(())
}

struct ScaleDown {
    client: Client,
}

#[async_trait]
impl AsyncStep for ScaleDown {
    fn state(&self) -> &'static str {
        SCALE_DOWN
    }

    async fn execute(&self, dogu: &Dogu) -> Result<&'static str> {
        let params = params(dogu)?;
        let deployment = self
            .client
            .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?;

        if let Some(deployment) = &deployment
            && params.original_replicas.is_none()
        {
            let replicas = deployment.spec.replicas;
            // Recorded before scaling so a repeated pass never records 0.
            self.client
                .update_status_with_retry(dogu, |status| {
                    if let Some(resize) = status.resize.as_mut()
                        && resize.original_replicas.is_none()
                    {
                        resize.original_replicas = Some(replicas);
                    }
                })
                .await?;
        }

        scale(&self.client, dogu, 0).await?;
        Ok(EDIT_PVC)
    }
}

struct EditPvc {
    client: Client,
}

#[async_trait]
impl AsyncStep for EditPvc {
    fn state(&self) -> &'static str {
        EDIT_PVC
    }

    async fn execute(&self, dogu: &Dogu) -> Result<&'static str> {
        let target: Quantity = params(dogu)?.target_size.parse()?;
        let claim = self
            .client
            .get::<VolumeClaimSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?;
        let current: Quantity = claim.spec.requested.parse()?;

        if target < current {
            return Err(Error::validation(
                "spec.resources.dataVolumeSize",
                format!("cannot shrink volume from {current} to {target}"),
            ));
        }

        let requested = target.to_string();
        self.client
            .update_spec_with_retry(&claim, |spec| spec.requested = requested.clone())
            .await?;
        info!(dogu = %dogu.metadata.name, size = %target, "Volume claim request raised");
        Ok(WAIT_FOR_RESIZE)
    }
}

struct WaitForResize {
    client: Client,
    poll_interval: Duration,
}

#[async_trait]
impl AsyncStep for WaitForResize {
    fn state(&self) -> &'static str {
        WAIT_FOR_RESIZE
    }

    async fn execute(&self, dogu: &Dogu) -> Result<&'static str> {
        let claim = self
            .client
            .get::<VolumeClaimSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?;
        let requested: Quantity = claim.spec.requested.parse()?;
        let reached = !claim.status.capacity.is_empty()
            && claim
                .status
                .capacity
                .parse::<Quantity>()
                .is_ok_and(|capacity| capacity >= requested);

        if !reached || claim.status.resize_pending() {
            return Err(Error::NotYetResized {
                claim: claim.metadata.name.clone(),
                requested: requested.to_string(),
                capacity: claim.status.capacity.clone(),
                wait: self.poll_interval,
            });
        }
        Ok(SCALE_UP)
    }
}

struct ScaleUp {
    client: Client,
}

#[async_trait]
impl AsyncStep for ScaleUp {
    fn state(&self) -> &'static str {
        SCALE_UP
    }

    async fn execute(&self, dogu: &Dogu) -> Result<&'static str> {
        let replicas = if dogu.spec.stopped {
            0
        } else {
            params(dogu)?.original_replicas.unwrap_or(1)
        };
        scale(&self.client, dogu, replicas).await?;
        Ok(FINISHED)
    }
}
