// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restart orchestration.
//!
//! A `DoguRestart` drives one stop-then-start cycle of a dogu:
//!
//! ```text
//!   New ──stop──▶ Stopping ──observed stopped──▶ Stopped ──start──▶ Starting ──observed ready──▶ Completed
//!    ▲              │                              ▲                  │
//!    └─ FailedStop ◀┘ (flag write failed)          └── FailedStart ◀──┘ (flag write failed)
//! ```
//!
//! Phases only move forward: every phase write is compare-and-advance on the
//! phase the action was chosen for. `Completed` and `DoguNotFound` are
//! terminal. Whether the dogu actually stopped or started is always checked
//! on the live deployment, never inferred from the flag the machine wrote.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{Event, EventRecorder, reason};
use crate::model::{
    DeploymentSpec, Dogu, DoguRestart, DoguRestartSpec, DoguSpec, ObjectReference,
    RESTART_FINALIZER, ResourceSpec, RestartPhase,
};
use crate::requeue::Action;
use crate::store::Client;

/// Restart timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartConfig {
    /// Delay between checks of the dogu's observed state.
    pub check_interval: Duration,
    /// Delay after a failed flag write or dogu fetch.
    pub retry_interval: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3),
            retry_interval: Duration::from_secs(10),
        }
    }
}

/// The action a restart phase maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    /// Set the dogu's stopped flag.
    Stop,
    /// Wait until the dogu is observed stopped.
    CheckStopped,
    /// Clear the dogu's stopped flag.
    Start,
    /// Wait until the dogu is observed ready.
    CheckStarted,
    /// Nothing left to do.
    Ignore,
}

impl RestartAction {
    /// Action for a phase.
    pub fn for_phase(phase: RestartPhase) -> Self {
        match phase {
            RestartPhase::New | RestartPhase::FailedStop => Self::Stop,
            RestartPhase::Stopping => Self::CheckStopped,
            RestartPhase::Stopped | RestartPhase::FailedStart => Self::Start,
            RestartPhase::Starting => Self::CheckStarted,
            RestartPhase::Completed | RestartPhase::DoguNotFound => Self::Ignore,
        }
    }
}

/// Reconciles `DoguRestart` objects.
pub struct RestartReconciler {
    client: Client,
    recorder: Arc<dyn EventRecorder>,
    config: RestartConfig,
}

impl RestartReconciler {
    /// Create a reconciler.
    pub fn new(client: Client, recorder: Arc<dyn EventRecorder>, config: RestartConfig) -> Self {
        Self {
            client,
            recorder,
            config,
        }
    }

    /// Run one pass for the named restart request.
    ///
    /// A failed store operation is reported as a `ReasonReconcileFail` event
    /// and retried after the retry interval; the phase is left as it was.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        match self.pass(namespace, name).await {
            Ok(action) => Ok(action),
            Err(e) => {
                let delay = self.config.retry_interval;
                warn!(restart = %name, error = %e, "Restart pass failed");
                self.recorder
                    .record(Event::warning(
                        ObjectReference {
                            kind: DoguRestartSpec::KIND.to_string(),
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                        },
                        reason::RECONCILE_FAIL,
                        format!("Trying again in {delay:?}: {e}"),
                    ))
                    .await;
                Ok(Action::Requeue(delay))
            }
        }
    }

    async fn pass(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(mut restart) = self
            .client
            .get_opt::<DoguRestartSpec>(namespace, name)
            .await?
        else {
            return Ok(Action::AwaitChange);
        };

        if restart.metadata.is_deleting() {
            return self.release(&restart).await;
        }

        let phase = restart.status.phase;
        if !phase.is_terminal() && !restart.metadata.has_finalizer(RESTART_FINALIZER) {
            restart = self
                .client
                .update_with_retry(&restart, |r| {
                    if !r.metadata.has_finalizer(RESTART_FINALIZER) {
                        r.metadata.finalizers.push(RESTART_FINALIZER.to_string());
                    }
                })
                .await?;
        }

        let action = RestartAction::for_phase(phase);
        debug!(restart = %name, phase = %phase, ?action, "Reconciling restart");
        if action == RestartAction::Ignore {
            return Ok(Action::AwaitChange);
        }

        let dogu = match self
            .client
            .get::<DoguSpec>(namespace, &restart.spec.dogu_name)
            .await
        {
            Ok(dogu) => dogu,
            Err(e) if e.is_not_found() => {
                warn!(restart = %name, dogu = %restart.spec.dogu_name, "Dogu to restart not found");
                self.recorder
                    .record(Event::warning(
                        restart.reference(),
                        reason::DOGU_NOT_FOUND,
                        format!("Dogu {} not found", restart.spec.dogu_name),
                    ))
                    .await;
                self.advance(&restart, phase, RestartPhase::DoguNotFound).await?;
                return Ok(Action::AwaitChange);
            }
            Err(e) => {
                warn!(restart = %name, error = %e, "Failed to get dogu");
                self.recorder
                    .record(Event::warning(
                        restart.reference(),
                        reason::FAILED_GET_DOGU,
                        format!("Failed to get dogu {}: {e}", restart.spec.dogu_name),
                    ))
                    .await;
                return Ok(Action::Requeue(self.config.retry_interval));
            }
        };

        match action {
            RestartAction::Stop => self.stop(&restart, &dogu, phase).await,
            RestartAction::CheckStopped => self.check_stopped(&restart, &dogu).await,
            RestartAction::Start => self.start(&restart, &dogu, phase).await,
            RestartAction::CheckStarted => self.check_started(&restart, &dogu).await,
            RestartAction::Ignore => Ok(Action::AwaitChange),
        }
    }

    async fn stop(
        &self,
        restart: &DoguRestart,
        dogu: &Dogu,
        phase: RestartPhase,
    ) -> Result<Action> {
        if let Err(e) = self
            .client
            .update_spec_with_retry(dogu, |spec| spec.stopped = true)
            .await
        {
            warn!(restart = %restart.metadata.name, error = %e, "Failed to stop dogu");
            self.recorder
                .record(Event::warning(
                    restart.reference(),
                    reason::FAILED_STOP,
                    format!("Failed to stop dogu {}: {e}", dogu.metadata.name),
                ))
                .await;
            self.advance(restart, phase, RestartPhase::FailedStop).await?;
            return Ok(Action::Requeue(self.config.retry_interval));
        }

        if self.advance(restart, phase, RestartPhase::Stopping).await? {
            self.recorder
                .record(Event::normal(
                    restart.reference(),
                    reason::STOPPING,
                    format!("Stopping dogu {}", dogu.metadata.name),
                ))
                .await;
        }
        Ok(Action::Requeue(self.config.check_interval))
    }

    async fn check_stopped(&self, restart: &DoguRestart, dogu: &Dogu) -> Result<Action> {
        if !self.is_stopped(dogu).await? {
            debug!(restart = %restart.metadata.name, dogu = %dogu.metadata.name, "Dogu not stopped yet");
            return Ok(Action::Requeue(self.config.check_interval));
        }

        if self
            .advance(restart, RestartPhase::Stopping, RestartPhase::Stopped)
            .await?
        {
            self.recorder
                .record(Event::normal(
                    restart.reference(),
                    reason::STOPPED,
                    format!("Dogu {} stopped", dogu.metadata.name),
                ))
                .await;
        }
        Ok(Action::Requeue(Duration::ZERO))
    }

    async fn start(
        &self,
        restart: &DoguRestart,
        dogu: &Dogu,
        phase: RestartPhase,
    ) -> Result<Action> {
        if let Err(e) = self
            .client
            .update_spec_with_retry(dogu, |spec| spec.stopped = false)
            .await
        {
            warn!(restart = %restart.metadata.name, error = %e, "Failed to start dogu");
            self.recorder
                .record(Event::warning(
                    restart.reference(),
                    reason::FAILED_START,
                    format!("Failed to start dogu {}: {e}", dogu.metadata.name),
                ))
                .await;
            self.advance(restart, phase, RestartPhase::FailedStart).await?;
            return Ok(Action::Requeue(self.config.retry_interval));
        }

        if self.advance(restart, phase, RestartPhase::Starting).await? {
            self.recorder
                .record(Event::normal(
                    restart.reference(),
                    reason::STARTING,
                    format!("Starting dogu {}", dogu.metadata.name),
                ))
                .await;
        }
        Ok(Action::Requeue(self.config.check_interval))
    }

    async fn check_started(&self, restart: &DoguRestart, dogu: &Dogu) -> Result<Action> {
        if !self.is_started(dogu).await? {
            debug!(restart = %restart.metadata.name, dogu = %dogu.metadata.name, "Dogu not started yet");
            return Ok(Action::Requeue(self.config.check_interval));
        }

        if self
            .advance(restart, RestartPhase::Starting, RestartPhase::Completed)
            .await?
        {
            info!(restart = %restart.metadata.name, dogu = %dogu.metadata.name, "Restart completed");
            self.recorder
                .record(Event::normal(
                    restart.reference(),
                    reason::STARTED,
                    format!("Dogu {} restarted", dogu.metadata.name),
                ))
                .await;
        }
        Ok(Action::AwaitChange)
    }

    /// Deployment absent, or scaled to and observed at zero replicas.
    async fn is_stopped(&self, dogu: &Dogu) -> Result<bool> {
        Ok(self
            .client
            .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
            .is_none_or(|d| {
                d.spec.replicas == 0 && d.status.replicas == 0 && d.status.ready_replicas == 0
            }))
    }

    /// Not flagged stopped and at least one ready replica.
    async fn is_started(&self, dogu: &Dogu) -> Result<bool> {
        if dogu.spec.stopped {
            return Ok(false);
        }
        Ok(self
            .client
            .get_opt::<DeploymentSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
            .is_some_and(|d| d.status.ready_replicas > 0))
    }

    /// Move the phase from `from` to `to`. Returns false if another pass
    /// already moved it.
    async fn advance(
        &self,
        restart: &DoguRestart,
        from: RestartPhase,
        to: RestartPhase,
    ) -> Result<bool> {
        let moved = AtomicBool::new(false);
        self.client
            .update_status_with_retry(restart, |status| {
                let applies = status.phase == from && from != to;
                moved.store(applies, Ordering::Relaxed);
                if applies {
                    status.phase = to;
                }
            })
            .await?;
        let advanced = moved.load(Ordering::Relaxed);
        if advanced {
            debug!(restart = %restart.metadata.name, %from, %to, "Restart phase advanced");
        }
        Ok(advanced)
    }

    /// Handle deletion of a restart request: never leave the dogu stopped
    /// because of a restart that no longer exists.
    async fn release(&self, restart: &DoguRestart) -> Result<Action> {
        if !restart.metadata.has_finalizer(RESTART_FINALIZER) {
            return Ok(Action::AwaitChange);
        }

        let left_stopped = matches!(
            restart.status.phase,
            RestartPhase::Stopping | RestartPhase::Stopped | RestartPhase::FailedStart
        );
        if left_stopped
            && let Some(dogu) = self
                .client
                .get_opt::<DoguSpec>(&restart.metadata.namespace, &restart.spec.dogu_name)
                .await?
        {
            self.client
                .update_spec_with_retry(&dogu, |spec| spec.stopped = false)
                .await?;
            info!(
                restart = %restart.metadata.name,
                dogu = %dogu.metadata.name,
                "Restart deleted mid-cycle, dogu started again"
            );
        }

        self.client
            .update_with_retry(restart, |r| {
                r.metadata.finalizers.retain(|f| f != RESTART_FINALIZER)
            })
            .await?;
        Ok(Action::AwaitChange)
    }
}
