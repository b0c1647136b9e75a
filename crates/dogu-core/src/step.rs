// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The unit of work of a reconciliation pass.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Dogu;

/// One idempotent operation of a pipeline.
///
/// A step must tolerate being run again with the same dogu state and must not
/// assume it is the only writer. Long waits are expressed by returning a
/// non-zero delay instead of sleeping: `Ok(Duration::ZERO)` lets the pipeline
/// continue, any other `Ok` pauses it until the next pass.
///
/// The dogu handed to `run` is the copy the pass started with. Steps that
/// write to it must go through the conflict-retrying client helpers, which
/// re-read the latest version.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs, events and error context.
    fn name(&self) -> &'static str;

    /// Whether a failure of this step must not stop the pipeline.
    fn best_effort(&self) -> bool {
        false
    }

    /// Run the step.
    async fn run(&self, dogu: &Dogu) -> Result<Duration>;
}
