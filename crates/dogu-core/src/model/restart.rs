// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restart requests.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ResourceSpec;

/// A request to stop and start a dogu once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoguRestartSpec {
    /// Simple name of the dogu to restart.
    pub dogu_name: String,
}

impl DoguRestartSpec {
    /// Restart request for the given dogu.
    pub fn new(dogu_name: impl Into<String>) -> Self {
        Self {
            dogu_name: dogu_name.into(),
        }
    }
}

impl ResourceSpec for DoguRestartSpec {
    const KIND: &'static str = "DoguRestart";
    type Status = DoguRestartStatus;
}

/// Progress of a restart request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoguRestartStatus {
    /// Current phase.
    pub phase: RestartPhase,
}

/// Phase of a restart request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartPhase {
    /// Not yet picked up.
    #[default]
    #[serde(rename = "")]
    New,
    /// The dogu was told to stop; waiting for it to scale down.
    Stopping,
    /// The dogu is observed stopped.
    Stopped,
    /// The dogu was told to start; waiting for a ready replica.
    Starting,
    /// The restart finished. Terminal.
    Completed,
    /// Setting the stopped flag failed; retried into `Stopping`.
    FailedStop,
    /// Clearing the stopped flag failed; retried into `Starting`.
    FailedStart,
    /// The referenced dogu does not exist. Terminal.
    DoguNotFound,
}

impl RestartPhase {
    /// Returns the string representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Completed => "completed",
            Self::FailedStop => "failedStop",
            Self::FailedStart => "failedStart",
            Self::DoguNotFound => "doguNotFound",
        }
    }

    /// Whether no further action will ever be taken.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DoguNotFound)
    }

    /// Position on the success path. Failure phases share the rank of the
    /// stage they are retried into.
    pub fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::FailedStop | Self::Stopping => 1,
            Self::Stopped => 2,
            Self::FailedStart | Self::Starting => 3,
            Self::Completed => 4,
            Self::DoguNotFound => 5,
        }
    }
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
