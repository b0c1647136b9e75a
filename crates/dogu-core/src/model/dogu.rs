// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The managed dogu resource.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ResourceSpec;
use crate::error::{Error, Result};

/// Desired configuration of a dogu. Owned by external actors; the engine only
/// touches `stopped` on behalf of a restart request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoguSpec {
    /// Qualified dogu name, e.g. `official/ldap`.
    pub name: String,
    /// Desired version, e.g. `2.6.2-1`.
    pub version: String,
    /// Whether the dogu should be scaled down.
    #[serde(default)]
    pub stopped: bool,
    /// Resource sizing.
    #[serde(default)]
    pub resources: DoguResources,
    /// Upgrade options.
    #[serde(default)]
    pub upgrade_config: UpgradeConfig,
    /// Service account types this dogu consumes from other dogus
    /// (`ldap`, `postgresql`, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<String>,
}

impl DoguSpec {
    /// Spec for the given qualified name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Name without the namespace prefix (`official/ldap` -> `ldap`).
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Parsed desired version.
    pub fn parsed_version(&self) -> Result<DoguVersion> {
        self.version.parse()
    }
}

impl ResourceSpec for DoguSpec {
    const KIND: &'static str = "Dogu";
    type Status = DoguStatus;
}

/// Resource sizing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoguResources {
    /// Requested size of the data volume (`2Gi`, `500Mi`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume_size: Option<String>,
}

/// Upgrade options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Allow switching the dogu namespace (`official/` -> `premium/`).
    #[serde(default)]
    pub allow_namespace_switch: bool,
    /// Allow installing a version lower than the installed one.
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Observed and control state of a dogu. Owned by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoguStatus {
    /// Lifecycle phase.
    #[serde(rename = "status")]
    pub phase: DoguPhase,
    /// Delay until the next forced reconciliation. Zero when synced.
    pub requeue_time: Duration,
    /// Next step of the pending async workflow. Empty when no workflow runs.
    pub requeue_phase: String,
    /// Whether the dogu was last settled in the stopped state.
    pub stopped: bool,
    /// Version the dogu was last settled with.
    pub installed_version: String,
    /// Parameters of a pending volume resize.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeParams>,
}

impl DoguStatus {
    /// Whether an async workflow is pending.
    pub fn workflow_pending(&self) -> bool {
        !self.requeue_phase.is_empty()
    }
}

/// Parameters needed to resume a volume resize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeParams {
    /// Requested claim size.
    pub target_size: String,
    /// Replica count before the workload was scaled down. Recorded once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_replicas: Option<i32>,
}

/// Lifecycle phase of a dogu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoguPhase {
    /// Never reconciled.
    #[default]
    #[serde(rename = "")]
    New,
    /// First rollout in progress.
    Installing,
    /// Running the desired version.
    Installed,
    /// Rolling out a new version.
    Upgrading,
    /// Scaling down.
    Stopping,
    /// Scaled down.
    Stopped,
    /// Scaling back up.
    Starting,
    /// Volume resize in progress.
    Resizing,
    /// Deletion pipeline running.
    Deleting,
    /// The spec cannot be applied until it is changed.
    ValidationFailed,
    /// A resize step failed; it is retried from the recorded step.
    ResizeFailed,
}

impl DoguPhase {
    /// Returns the string representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Upgrading => "upgrading",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Resizing => "resizing",
            Self::Deleting => "deleting",
            Self::ValidationFailed => "validationFailed",
            Self::ResizeFailed => "resizeFailed",
        }
    }

    /// Parse a phase from a string. Unknown values map to [`DoguPhase::New`].
    pub fn parse(s: &str) -> Self {
        match s {
            "installing" => Self::Installing,
            "installed" => Self::Installed,
            "upgrading" => Self::Upgrading,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "starting" => Self::Starting,
            "resizing" => Self::Resizing,
            "deleting" => Self::Deleting,
            "validationFailed" => Self::ValidationFailed,
            "resizeFailed" => Self::ResizeFailed,
            _ => Self::New,
        }
    }
}

impl fmt::Display for DoguPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dogu version in `major.minor.patch-nano` form.
///
/// Missing minor/patch components default to zero, as does a missing nano
/// suffix. Ordering compares all four components in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoguVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
    /// Packaging revision.
    pub nano: u32,
}

impl FromStr for DoguVersion {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid =
            |message: &str| Error::validation("spec.version", format!("'{raw}': {message}"));

        let (core, nano) = match raw.split_once('-') {
            Some((core, nano)) => (core, Some(nano)),
            None => (raw, None),
        };
        if core.is_empty() {
            return Err(invalid("empty version"));
        }

        let mut parts = [0u32; 3];
        let mut count = 0;
        for part in core.split('.') {
            if count == parts.len() {
                return Err(invalid("too many components"));
            }
            parts[count] = part
                .parse()
                .map_err(|_| invalid("components must be numeric"))?;
            count += 1;
        }

        let nano = match nano {
            Some(n) => n.parse().map_err(|_| invalid("nano version must be numeric"))?,
            None => 0,
        };

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            nano,
        })
    }
}

impl Ord for DoguVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.nano).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.nano,
        ))
    }
}

impl PartialOrd for DoguVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DoguVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, self.nano)
    }
}
