// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumable multi-pass workflows.
//!
//! An [`AsyncExecutor`] runs an ordered list of named [`AsyncStep`]s, one step
//! per reconciliation pass. The name of the next step is persisted in
//! `status.requeuePhase` after every successful step, so a crash between passes
//! loses no progress: the next pass reads the recorded name and resumes there.
//!
//! ```text
//!   requeuePhase:  ""  ──begin──▶ ScaleDown ──▶ EditPVC ──▶ WaitForResize ──▶ ScaleUp ──▶ "" (Finished)
//!                                                              │   ▲
//!                                                              └───┘ not yet resized (wait)
//! ```
//!
//! Advancing is compare-and-advance: the recorded name only moves if it still
//! equals the state the step ran from, so an overlapping stale pass can never
//! move the workflow backwards.

pub mod resize;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Dogu, DoguPhase, DoguStatus};
use crate::store::Client;

/// Terminal marker returned by the last step of a workflow.
pub const FINISHED: &str = "Finished";

/// One step of a resumable workflow.
#[async_trait]
pub trait AsyncStep: Send + Sync {
    /// State name under which the step is registered.
    fn state(&self) -> &'static str;

    /// Run the step and return the name of the next state, or [`FINISHED`].
    ///
    /// An error carrying [`Error::retry_after`] means "not done yet": the
    /// executor keeps the state and polls again after the wait.
    async fn execute(&self, dogu: &Dogu) -> Result<&'static str>;
}

/// Result of one executor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A step succeeded and the next one is recorded.
    Advanced {
        /// State the step ran from.
        from: &'static str,
        /// Recorded next state.
        to: &'static str,
    },
    /// The current step is waiting for the infrastructure.
    Waiting(Duration),
    /// The workflow completed and its state was cleared.
    Finished,
    /// Another pass moved the workflow on first; nothing was recorded.
    Superseded,
}

/// Runs a fixed list of [`AsyncStep`]s across passes.
pub struct AsyncExecutor {
    name: &'static str,
    client: Client,
    steps: Vec<Arc<dyn AsyncStep>>,
    running_phase: DoguPhase,
    failed_phase: DoguPhase,
    step_interval: Duration,
    clear_params: fn(&mut DoguStatus),
}

impl AsyncExecutor {
    /// Create an executor. `steps` must not be empty.
    pub fn new(name: &'static str, client: Client, steps: Vec<Arc<dyn AsyncStep>>) -> Self {
        Self {
            name,
            client,
            steps,
            running_phase: DoguPhase::Resizing,
            failed_phase: DoguPhase::ResizeFailed,
            step_interval: Duration::from_secs(1),
            clear_params: |_| {},
        }
    }

    /// Phases recorded while the workflow runs and after a step failed.
    pub fn with_phases(mut self, running: DoguPhase, failed: DoguPhase) -> Self {
        self.running_phase = running;
        self.failed_phase = failed;
        self
    }

    /// Delay before the pass following a successful step.
    pub fn with_step_interval(mut self, interval: Duration) -> Self {
        self.step_interval = interval;
        self
    }

    /// Hook clearing workflow parameters from the status once finished.
    pub fn with_param_cleanup(mut self, clear: fn(&mut DoguStatus)) -> Self {
        self.clear_params = clear;
        self
    }

    /// Workflow name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Delay before the pass following a successful step.
    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }

    /// Registered state names in execution order.
    pub fn states(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.state()).collect()
    }

    /// Record the start of the workflow: the first state, the running phase,
    /// and whatever parameters `prepare` sets. Does nothing if a workflow is
    /// already pending.
    pub async fn begin<F>(&self, dogu: &Dogu, prepare: F) -> Result<Dogu>
    where
        F: Fn(&mut DoguStatus) + Send + Sync,
    {
        let first = self.first()?.state();
        let running = self.running_phase;
        let updated = self
            .client
            .update_status_with_retry(dogu, |status| {
                if status.workflow_pending() {
                    return;
                }
                prepare(status);
                status.requeue_phase = first.to_string();
                status.phase = running;
            })
            .await?;
        info!(workflow = self.name, dogu = %dogu.metadata.name, state = first, "Workflow started");
        Ok(updated)
    }

    /// Run the step recorded in `dogu.status.requeuePhase`.
    ///
    /// Returns an error only for failed steps; the failure phase is recorded
    /// and the state kept, so the next pass retries the same step.
    pub async fn execute(&self, dogu: &Dogu) -> Result<Progress> {
        let recorded = dogu.status.requeue_phase.as_str();
        let step = match self.steps.iter().find(|s| s.state() == recorded) {
            Some(step) => step,
            None => {
                if !recorded.is_empty() {
                    warn!(
                        workflow = self.name,
                        dogu = %dogu.metadata.name,
                        state = recorded,
                        "Recorded state is not registered, starting from the first step"
                    );
                }
                self.first()?
            }
        };
        let from = step.state();
        debug!(workflow = self.name, dogu = %dogu.metadata.name, state = from, "Executing workflow step");

        let next = match step.execute(dogu).await {
            Ok(next) => next,
            Err(e) => {
                if let Some(wait) = e.retry_after() {
                    debug!(
                        workflow = self.name,
                        dogu = %dogu.metadata.name,
                        state = from,
                        reason = %e,
                        wait_ms = wait.as_millis() as u64,
                        "Workflow step not done yet"
                    );
                    return Ok(Progress::Waiting(wait));
                }
                return Err(self.record_failure(dogu, from, e).await);
            }
        };

        let finished = next == FINISHED;
        if !finished && !self.steps.iter().any(|s| s.state() == next) {
            let e = Error::UnknownWorkflowState(next.to_string());
            return Err(self.record_failure(dogu, from, e).await);
        }

        let settled = if dogu.spec.stopped {
            DoguPhase::Stopped
        } else {
            DoguPhase::Installed
        };
        let running = self.running_phase;
        let clear_params = self.clear_params;
        let recorded = recorded.to_string();
        let moved = AtomicBool::new(false);
        let updated = self
            .client
            .update_status_with_retry(dogu, |status| {
                let current = status.requeue_phase == recorded;
                moved.store(current, Ordering::Relaxed);
                if !current {
                    return;
                }
                if finished {
                    status.requeue_phase.clear();
                    status.phase = settled;
                    clear_params(status);
                } else {
                    status.requeue_phase = next.to_string();
                    status.phase = running;
                }
            })
            .await?;

        if !moved.load(Ordering::Relaxed) {
            debug!(
                workflow = self.name,
                dogu = %dogu.metadata.name,
                state = from,
                recorded = %updated.status.requeue_phase,
                "Workflow advanced by another pass"
            );
            return Ok(Progress::Superseded);
        }

        if finished {
            info!(workflow = self.name, dogu = %dogu.metadata.name, phase = %settled, "Workflow finished");
            Ok(Progress::Finished)
        } else {
            info!(workflow = self.name, dogu = %dogu.metadata.name, from, to = next, "Workflow advanced");
            Ok(Progress::Advanced { from, to: next })
        }
    }

    fn first(&self) -> Result<&Arc<dyn AsyncStep>> {
        self.steps
            .first()
            .ok_or_else(|| Error::UnknownWorkflowState(format!("{} has no steps", self.name)))
    }

    async fn record_failure(&self, dogu: &Dogu, state: &'static str, error: Error) -> Error {
        warn!(
            workflow = self.name,
            dogu = %dogu.metadata.name,
            state,
            error = %error,
            "Workflow step failed"
        );
        let failed = self.failed_phase;
        if let Err(e) = self
            .client
            .update_status_with_retry(dogu, |status| status.phase = failed)
            .await
        {
            warn!(workflow = self.name, dogu = %dogu.metadata.name, error = %e, "Failed to record failure phase");
        }
        error.in_step(state)
    }
}
