// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordered step pipelines.
//!
//! Both pipeline kinds dispatch the same way: steps run strictly in order and
//! the pass ends at the first error or the first non-zero requeue delay.
//! Earlier steps are never revisited within a pass; the next pass starts again
//! from the first step and relies on every step being idempotent.
//!
//! A step flagged [`Step::best_effort`] may fail without ending the pass. Its
//! error is reported in [`PipelineOutcome::skipped`].
//!
//! Delete pipelines are built with [`Pipeline::delete`], which always appends
//! the finalizer step last, so the object cannot be reaped before every
//! cleanup step ran.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::model::Dogu;
use crate::step::Step;

/// What a pipeline is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Install, upgrade and start/stop convergence.
    Apply,
    /// Teardown ending with finalizer removal.
    Delete,
}

impl PipelineKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Delete => "delete",
        }
    }
}

/// Result of one pipeline pass.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Requested delay before the next pass. Zero when the pass converged or
    /// an error without an explicit wait occurred.
    pub requeue_after: Duration,
    /// The error that ended the pass, wrapped with the failing step's name.
    pub error: Option<Error>,
    /// Steps that ran to completion, in order.
    pub completed: Vec<&'static str>,
    /// Best-effort steps that failed and were passed over.
    pub skipped: Vec<(&'static str, Error)>,
}

impl PipelineOutcome {
    /// Whether every step completed without a requeue.
    pub fn converged(&self) -> bool {
        self.error.is_none() && self.requeue_after.is_zero()
    }
}

/// An ordered list of steps.
pub struct Pipeline {
    name: &'static str,
    kind: PipelineKind,
    steps: Vec<Arc<dyn Step>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("steps", &self.step_names())
            .finish()
    }
}

impl Pipeline {
    /// Apply pipeline running `steps` in order.
    pub fn apply(name: &'static str, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name,
            kind: PipelineKind::Apply,
            steps,
        }
    }

    /// Delete pipeline running `steps` in order, then `finalizer`.
    pub fn delete(
        name: &'static str,
        mut steps: Vec<Arc<dyn Step>>,
        finalizer: Arc<dyn Step>,
    ) -> Self {
        steps.push(finalizer);
        Self {
            name,
            kind: PipelineKind::Delete,
            steps,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pipeline kind.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Names of the steps in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run one pass over `dogu`.
    pub async fn run(&self, dogu: &Dogu) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let dogu_name = dogu.metadata.name.as_str();

        for step in &self.steps {
            let step_name = step.name();
            debug!(pipeline = self.name, dogu = %dogu_name, step = step_name, "Running step");

            match step.run(dogu).await {
                Ok(delay) => {
                    outcome.completed.push(step_name);
                    if !delay.is_zero() {
                        info!(
                            pipeline = self.name,
                            dogu = %dogu_name,
                            step = step_name,
                            requeue_after_ms = delay.as_millis() as u64,
                            "Step requested requeue, pausing pipeline"
                        );
                        outcome.requeue_after = delay;
                        return outcome;
                    }
                }
                Err(e) if step.best_effort() => {
                    warn!(
                        pipeline = self.name,
                        dogu = %dogu_name,
                        step = step_name,
                        error = %e,
                        "Best-effort step failed, continuing"
                    );
                    outcome.skipped.push((step_name, e));
                }
                Err(e) => {
                    warn!(
                        pipeline = self.name,
                        dogu = %dogu_name,
                        step = step_name,
                        error = %e,
                        "Step failed"
                    );
                    outcome.requeue_after = e.retry_after().unwrap_or(Duration::ZERO);
                    outcome.error = Some(e.in_step(step_name));
                    return outcome;
                }
            }
        }

        debug!(
            pipeline = self.name,
            kind = self.kind.as_str(),
            dogu = %dogu_name,
            steps = outcome.completed.len(),
            "Pipeline completed"
        );
        outcome
    }
}
