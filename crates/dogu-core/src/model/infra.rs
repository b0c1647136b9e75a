// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subordinate infrastructure objects owned by a dogu.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ObjectReference, ResourceSpec};

/// Status of kinds that carry no observed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoStatus {}

/// Desired state of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Desired replica count.
    pub replicas: i32,
    /// Container image reference.
    pub image: String,
}

impl ResourceSpec for DeploymentSpec {
    const KIND: &'static str = "Deployment";
    type Status = DeploymentStatus;
}

/// Observed state of a workload, reported by the infrastructure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentStatus {
    /// Running replicas.
    pub replicas: i32,
    /// Replicas passing their readiness checks.
    pub ready_replicas: i32,
}

/// Network service in front of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selected workload labels.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Exposed port.
    pub port: u16,
}

impl ResourceSpec for ServiceSpec {
    const KIND: &'static str = "Service";
    type Status = NoStatus;
}

/// Requested size of a persistent volume claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    /// Requested storage, e.g. `2Gi`.
    pub requested: String,
}

impl ResourceSpec for VolumeClaimSpec {
    const KIND: &'static str = "PersistentVolumeClaim";
    type Status = VolumeClaimStatus;
}

/// Observed state of a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeClaimStatus {
    /// Capacity reported by the storage layer. Empty until bound.
    pub capacity: String,
    /// Reported conditions.
    pub conditions: Vec<VolumeClaimCondition>,
}

impl VolumeClaimStatus {
    /// Condition reported while the node still has to grow the filesystem.
    pub const FILE_SYSTEM_RESIZE_PENDING: &'static str = "FileSystemResizePending";

    /// Whether a filesystem resize is still pending.
    pub fn resize_pending(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == Self::FILE_SYSTEM_RESIZE_PENDING && c.status)
    }
}

/// A claim condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimCondition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Whether the condition holds.
    pub status: bool,
}

/// Configuration entries of a dogu.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapSpec {
    /// Key/value entries.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ResourceSpec for ConfigMapSpec {
    const KIND: &'static str = "ConfigMap";
    type Status = NoStatus;
}

/// Service account one dogu provides to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSpec {
    /// Dogu using the account.
    pub consumer: String,
    /// Account type, e.g. `ldap` or `postgresql`.
    pub account_type: String,
}

impl ResourceSpec for ServiceAccountSpec {
    const KIND: &'static str = "ServiceAccount";
    type Status = NoStatus;
}

/// Local registry entry of an installed dogu version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoguRegistrationSpec {
    /// Qualified dogu name.
    pub dogu: String,
    /// Registered version.
    pub version: String,
}

impl ResourceSpec for DoguRegistrationSpec {
    const KIND: &'static str = "DoguRegistration";
    type Status = NoStatus;
}

/// A persisted resource event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSpec {
    /// Object the event is about.
    pub involved_object: ObjectReference,
    /// `Normal` or `Warning`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Short machine-readable reason.
    pub reason: String,
    /// Message of the latest occurrence.
    pub message: String,
    /// Number of occurrences.
    pub count: u32,
    /// First occurrence.
    pub first_timestamp: DateTime<Utc>,
    /// Latest occurrence.
    pub timestamp: DateTime<Utc>,
}

impl ResourceSpec for EventSpec {
    const KIND: &'static str = "Event";
    type Status = NoStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_pending_condition() {
        let mut status = VolumeClaimStatus {
            capacity: "1Gi".to_string(),
            conditions: vec![],
        };
        assert!(!status.resize_pending());

        status.conditions.push(VolumeClaimCondition {
            condition_type: VolumeClaimStatus::FILE_SYSTEM_RESIZE_PENDING.to_string(),
            status: false,
        });
        assert!(!status.resize_pending());

        status.conditions[0].status = true;
        assert!(status.resize_pending());
    }
}
