// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object model shared by the engine and the store backends.
//!
//! Every persisted object has the same envelope, [`Object`]: metadata, a spec
//! owned by the declaring actor and a status owned by the engine. The
//! [`ResourceSpec`] trait ties a spec type to its kind string and status type.

mod dogu;
mod infra;
mod quantity;
mod restart;

pub use dogu::{
    DoguPhase, DoguResources, DoguSpec, DoguStatus, DoguVersion, ResizeParams, UpgradeConfig,
};
pub use infra::{
    ConfigMapSpec, DeploymentSpec, DeploymentStatus, DoguRegistrationSpec, EventSpec, NoStatus,
    ServiceAccountSpec, ServiceSpec, VolumeClaimCondition, VolumeClaimSpec, VolumeClaimStatus,
};
pub use quantity::Quantity;
pub use restart::{DoguRestartSpec, DoguRestartStatus, RestartPhase};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label carrying the name of the dogu an object belongs to.
pub const DOGU_LABEL: &str = "dogu.name";

/// Finalizer the engine puts on every dogu it manages.
pub const DOGU_FINALIZER: &str = "dogu-finalizer";

/// Finalizer the engine puts on restart requests.
pub const RESTART_FINALIZER: &str = "dogu-restart-finalizer";

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Free-form labels used for selection.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Finalizers blocking removal of the object.
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Version assigned by the store on every write. Zero for objects that
    /// were never persisted.
    #[serde(default)]
    pub resource_version: u64,
    /// Set once deletion was requested while finalizers were present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a new object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Whether the given finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Whether deletion was requested.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// A spec type that can be persisted as its own kind.
pub trait ResourceSpec:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Kind string, e.g. `Dogu`.
    const KIND: &'static str;

    /// Status owned by the engine.
    type Status: Serialize
        + DeserializeOwned
        + Clone
        + Default
        + PartialEq
        + fmt::Debug
        + Send
        + Sync
        + 'static;
}

/// Persisted object envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object<S, T> {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: S,
    /// Observed/control state.
    pub status: T,
}

/// Object envelope for a [`ResourceSpec`].
pub type Resource<S> = Object<S, <S as ResourceSpec>::Status>;

/// A managed dogu.
pub type Dogu = Resource<DoguSpec>;
/// A restart request for a dogu.
pub type DoguRestart = Resource<DoguRestartSpec>;
/// Workload running a dogu.
pub type Deployment = Resource<DeploymentSpec>;
/// Network service in front of a dogu.
pub type Service = Resource<ServiceSpec>;
/// Persistent data volume of a dogu.
pub type VolumeClaim = Resource<VolumeClaimSpec>;
/// Configuration entries.
pub type ConfigMap = Resource<ConfigMapSpec>;
/// Service account provided to a dogu by another dogu.
pub type ServiceAccount = Resource<ServiceAccountSpec>;
/// Local registry entry of a dogu.
pub type DoguRegistration = Resource<DoguRegistrationSpec>;
/// Recorded resource event.
pub type EventObject = Resource<EventSpec>;

impl<S: ResourceSpec> Object<S, S::Status> {
    /// Create a new, never persisted object with a default status.
    pub fn new(metadata: ObjectMeta, spec: S) -> Self {
        Self {
            metadata,
            spec,
            status: S::Status::default(),
        }
    }

    /// Store key of this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(S::KIND, &self.metadata.namespace, &self.metadata.name)
    }

    /// Reference used when emitting events about this object.
    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            kind: S::KIND.to_string(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Fail with [`Error::MissingObjectKey`] if name or namespace is empty.
    pub fn ensure_identity(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(Error::MissingObjectKey(".metadata.name"));
        }
        if self.metadata.namespace.is_empty() {
            return Err(Error::MissingObjectKey(".metadata.namespace"));
        }
        Ok(())
    }
}

/// Store key of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Object kind.
    pub kind: String,
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

impl ObjectKey {
    /// Create a key.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a typed object.
    pub fn of<S: ResourceSpec>(namespace: &str, name: &str) -> Self {
        Self::new(S::KIND, namespace, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Object kind.
    pub kind: String,
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector requiring `key=value`.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and(key, value)
    }

    /// Add another `key=value` requirement.
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Whether the labels satisfy every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}
