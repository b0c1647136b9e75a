// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entry point of a dogu reconciliation pass.
//!
//! [`DoguReconciler::reconcile`] picks exactly one operation per pass:
//!
//! 1. deletion requested → delete pipeline
//! 2. resize workflow pending → next resize step
//! 3. declared volume size grew → start the resize workflow
//! 4. otherwise → apply pipeline
//!
//! Outcomes of 2-4 go through the [`RequeueHandler`]. The delete path
//! schedules directly, since the handler leaves deleting dogus alone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{Event, EventRecorder, reason};
use crate::model::{DOGU_FINALIZER, Dogu, DoguPhase, DoguSpec};
use crate::pipeline::Pipeline;
use crate::requeue::{Action, RequeueConfig, RequeueHandler};
use crate::steps::{StepContext, apply_pipeline, delete_pipeline};
use crate::store::Client;
use crate::workflow::resize::{self, ResizeConfig};
use crate::workflow::{AsyncExecutor, Progress};

/// Reconciles `Dogu` objects.
pub struct DoguReconciler {
    client: Client,
    recorder: Arc<dyn EventRecorder>,
    apply: Pipeline,
    delete: Pipeline,
    resize: AsyncExecutor,
    requeue: RequeueHandler,
}

impl DoguReconciler {
    /// Create a reconciler from the step context and timing settings.
    pub fn new(
        ctx: StepContext,
        recorder: Arc<dyn EventRecorder>,
        requeue: RequeueConfig,
        resize: ResizeConfig,
    ) -> Self {
        Self {
            client: ctx.client.clone(),
            apply: apply_pipeline(&ctx),
            delete: delete_pipeline(&ctx),
            resize: resize::resize_workflow(ctx.client.clone(), resize),
            requeue: RequeueHandler::new(ctx.client.clone(), recorder.clone(), requeue),
            recorder,
        }
    }

    /// Run one pass for the named dogu.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(dogu) = self.client.get_opt::<DoguSpec>(namespace, name).await? else {
            debug!(dogu = %name, "Dogu gone, nothing to do");
            return Ok(Action::AwaitChange);
        };
        dogu.ensure_identity()?;

        if dogu.metadata.is_deleting() {
            return Ok(self.run_delete(&dogu).await);
        }

        if dogu.status.workflow_pending() {
            return Ok(self.run_resize(&dogu).await);
        }

        match resize::required_resize(&self.client, &dogu).await {
            Ok(Some(target)) => {
                let started = match self
                    .resize
                    .begin(&dogu, |status| resize::prepare(status, &target))
                    .await
                {
                    Ok(started) => started,
                    Err(e) => {
                        warn!(dogu = %name, error = %e, "Failed to start resize");
                        self.recorder
                            .record(Event::warning(
                                dogu.reference(),
                                reason::RESIZE_FAILED,
                                format!("Failed to start resizing data volume to {target}: {e}"),
                            ))
                            .await;
                        return Ok(self.requeue.handle(&dogu, Some(&e), Duration::ZERO).await);
                    }
                };
                self.recorder
                    .record(Event::normal(
                        dogu.reference(),
                        reason::RESIZE_STARTED,
                        format!("Resizing data volume to {target}"),
                    ))
                    .await;
                return Ok(self.run_resize(&started).await);
            }
            Ok(None) => {}
            Err(e) if e.is_permanent() => return Ok(self.reject(&dogu, e).await),
            Err(e) => return Ok(self.requeue.handle(&dogu, Some(&e), Duration::ZERO).await),
        }

        let outcome = self.apply.run(&dogu).await;
        match outcome.error {
            Some(e) if e.is_permanent() => Ok(self.reject(&dogu, e).await),
            Some(e) => Ok(self.requeue.handle(&dogu, Some(&e), outcome.requeue_after).await),
            None => Ok(self.requeue.handle(&dogu, None, outcome.requeue_after).await),
        }
    }

    async fn run_delete(&self, dogu: &Dogu) -> Action {
        if !dogu.metadata.has_finalizer(DOGU_FINALIZER) {
            return Action::AwaitChange;
        }

        let outcome = self.delete.run(dogu).await;
        for (step, error) in &outcome.skipped {
            self.recorder
                .record(Event::warning(
                    dogu.reference(),
                    reason::CLEANUP_FAILED,
                    format!("{step} failed, continuing deletion: {error}"),
                ))
                .await;
        }

        match outcome.error {
            Some(e) => {
                let delay = outcome.requeue_after.max(self.requeue.config().min_backoff);
                warn!(dogu = %dogu.metadata.name, error = %e, "Deletion failed");
                self.recorder
                    .record(Event::warning(
                        dogu.reference(),
                        reason::RECONCILE_FAIL,
                        format!("Deletion failed, trying again in {delay:?}: {e}"),
                    ))
                    .await;
                Action::Requeue(delay)
            }
            None if !outcome.requeue_after.is_zero() => Action::Requeue(outcome.requeue_after),
            None => {
                info!(dogu = %dogu.metadata.name, "Dogu deleted");
                Action::AwaitChange
            }
        }
    }

    async fn run_resize(&self, dogu: &Dogu) -> Action {
        let interval = self.resize.step_interval();
        match self.resize.execute(dogu).await {
            Ok(Progress::Waiting(wait)) => self.requeue.handle(dogu, None, wait).await,
            Ok(Progress::Finished) => {
                self.recorder
                    .record(Event::normal(
                        dogu.reference(),
                        reason::RESIZE_FINISHED,
                        "Data volume resized",
                    ))
                    .await;
                self.requeue.handle(dogu, None, interval).await
            }
            Ok(Progress::Advanced { .. } | Progress::Superseded) => {
                self.requeue.handle(dogu, None, interval).await
            }
            Err(e) => {
                self.recorder
                    .record(Event::warning(
                        dogu.reference(),
                        reason::RESIZE_FAILED,
                        e.to_string(),
                    ))
                    .await;
                self.requeue.handle(dogu, Some(&e), Duration::ZERO).await
            }
        }
    }

    /// Record a permanent failure and hand it to the requeue handler, which
    /// schedules the slow backoff.
    async fn reject(&self, dogu: &Dogu, error: Error) -> Action {
        if let Err(e) = self
            .client
            .update_status_with_retry(dogu, |status| status.phase = DoguPhase::ValidationFailed)
            .await
        {
            warn!(dogu = %dogu.metadata.name, error = %e, "Failed to record validation failure");
        }
        self.recorder
            .record(Event::warning(
                dogu.reference(),
                reason::VALIDATION_FAILED,
                error.to_string(),
            ))
            .await;
        self.requeue.handle(dogu, Some(&error), Duration::ZERO).await
    }
}
