// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object store abstraction and the typed client the engine talks to.
//!
//! [`ObjectStore`] is the backend seam: untyped JSON bodies addressed by
//! [`ObjectKey`], guarded by an integer resource version. [`Client`] layers the
//! typed API on top of it, including the API-server style rules for deletion
//! (finalizers block removal) and the conflict-retrying read-modify-write
//! helpers.

mod memory;
mod retry;

pub use memory::MemoryObjectStore;
pub use retry::{RetryPolicy, retry_on_conflict};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{LabelSelector, ObjectKey, Resource, ResourceSpec};

/// Capacity of the watch channel of the bundled backends.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// An object as stored by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    /// Object key.
    pub key: ObjectKey,
    /// Version of the stored body.
    pub resource_version: u64,
    /// Serialized [`crate::model::Object`].
    pub body: Value,
}

/// Which part of an object a replace writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScope {
    /// Metadata and spec.
    Object,
    /// Status only.
    Status,
}

/// Kind of change reported to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Object created.
    Created,
    /// Metadata or spec changed.
    Updated,
    /// Only the status changed.
    StatusUpdated,
    /// Object removed.
    Deleted,
}

/// Change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Changed object.
    pub key: ObjectKey,
    /// Kind of change.
    pub kind: WatchEventKind,
}

impl From<UpdateScope> for WatchEventKind {
    fn from(scope: UpdateScope) -> Self {
        match scope {
            UpdateScope::Object => Self::Updated,
            UpdateScope::Status => Self::StatusUpdated,
        }
    }
}

/// Storage backend for objects.
///
/// Implementations must make `replace` a compare-and-swap on the resource
/// version and publish a [`WatchEvent`] for every successful write.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Load an object.
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>>;

    /// List all objects of a kind in a namespace, ordered by name.
    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<RawObject>>;

    /// Create an object. Fails with [`Error::AlreadyExists`] if the key is taken.
    /// Returns the assigned version.
    async fn create(&self, key: &ObjectKey, body: Value) -> Result<u64>;

    /// Replace an object if its stored version equals `expected_version`.
    /// Fails with [`Error::Conflict`] on a version mismatch and
    /// [`Error::NotFound`] if the object is gone. Returns the new version.
    async fn replace(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        body: Value,
        scope: UpdateScope,
    ) -> Result<u64>;

    /// Remove an object. Returns whether it existed.
    ///
    /// With `expected_version`, an object stored at a different version is
    /// kept and [`Error::Conflict`] returned.
    async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> Result<bool>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Typed access to an [`ObjectStore`].
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl Client {
    /// Create a client over the given backend.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Use a different conflict retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Conflict retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The untyped backend.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Subscribe to change notifications of the backend.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.watch()
    }

    /// Load an object, failing with [`Error::NotFound`] if it does not exist.
    pub async fn get<S: ResourceSpec>(&self, namespace: &str, name: &str) -> Result<Resource<S>> {
        self.get_opt::<S>(namespace, name)
            .await?
            .ok_or_else(|| Error::not_found(S::KIND, name))
    }

    /// Load an object if it exists.
    pub async fn get_opt<S: ResourceSpec>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Resource<S>>> {
        let key = ObjectKey::of::<S>(namespace, name);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(decode(raw)?)),
            None => Ok(None),
        }
    }

    /// List objects of a kind in a namespace matching the selector.
    pub async fn list<S: ResourceSpec>(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Resource<S>>> {
        let mut objects = Vec::new();
        for raw in self.store.list(S::KIND, namespace).await? {
            let object: Resource<S> = decode(raw)?;
            if selector.matches(&object.metadata.labels) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Create an object. Its resource version and deletion timestamp are
    /// ignored.
    pub async fn create<S: ResourceSpec>(&self, object: &Resource<S>) -> Result<Resource<S>> {
        object.ensure_identity()?;
        let mut created = object.clone();
        created.metadata.resource_version = 0;
        created.metadata.deletion_timestamp = None;

        let key = created.key();
        let version = self
            .store
            .create(&key, serde_json::to_value(&created)?)
            .await?;
        created.metadata.resource_version = version;
        debug!(%key, version, "Object created");
        Ok(created)
    }

    /// Write metadata and spec of an object, keeping the stored status.
    ///
    /// Fails with [`Error::Conflict`] if the object changed since it was read.
    /// Spec changes are rejected once deletion was requested, and a deleting
    /// object whose last finalizer is removed is reaped.
    pub async fn update<S: ResourceSpec>(&self, object: &Resource<S>) -> Result<Resource<S>> {
        let key = object.key();
        let current: Resource<S> = self.current(&key, object.metadata.resource_version).await?;

        let mut next = object.clone();
        next.status = current.status;
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp;

        if next.metadata.is_deleting() {
            if next.spec != current.spec {
                return Err(Error::Forbidden(format!(
                    "{key} is being deleted; its spec can no longer change"
                )));
            }
            if next.metadata.finalizers.is_empty() {
                self.store
                    .delete(&key, Some(current.metadata.resource_version))
                    .await?;
                debug!(%key, "Last finalizer removed, object reaped");
                return Ok(next);
            }
        }

        next.metadata.resource_version = self
            .store
            .replace(
                &key,
                current.metadata.resource_version,
                serde_json::to_value(&next)?,
                UpdateScope::Object,
            )
            .await?;
        Ok(next)
    }

    /// Write the status of an object, keeping the stored metadata and spec.
    ///
    /// Fails with [`Error::Conflict`] if the object changed since it was read.
    pub async fn update_status<S: ResourceSpec>(
        &self,
        object: &Resource<S>,
    ) -> Result<Resource<S>> {
        let key = object.key();
        let mut next: Resource<S> = self.current(&key, object.metadata.resource_version).await?;
        next.status = object.status.clone();

        next.metadata.resource_version = self
            .store
            .replace(
                &key,
                next.metadata.resource_version,
                serde_json::to_value(&next)?,
                UpdateScope::Status,
            )
            .await?;
        Ok(next)
    }

    /// Request deletion. Objects with finalizers only get a deletion timestamp;
    /// the rest are removed. Returns whether the object existed.
    pub async fn delete<S: ResourceSpec>(&self, namespace: &str, name: &str) -> Result<bool> {
        let Some(mut object) = self.get_opt::<S>(namespace, name).await? else {
            return Ok(false);
        };
        let key = object.key();

        if object.metadata.finalizers.is_empty() {
            let existed = self.store.delete(&key, None).await?;
            debug!(%key, "Object deleted");
            return Ok(existed);
        }

        if !object.metadata.is_deleting() {
            object.metadata.deletion_timestamp = Some(Utc::now());
            self.store
                .replace(
                    &key,
                    object.metadata.resource_version,
                    serde_json::to_value(&object)?,
                    UpdateScope::Object,
                )
                .await?;
            debug!(%key, finalizers = ?object.metadata.finalizers, "Deletion requested");
        }
        Ok(true)
    }

    /// Apply `mutate` to the latest status under conflict retry. Nothing is
    /// written when the mutation leaves the status unchanged.
    pub async fn update_status_with_retry<S, F>(
        &self,
        object: &Resource<S>,
        mutate: F,
    ) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        F: Fn(&mut S::Status) + Send + Sync,
    {
        let namespace = object.metadata.namespace.as_str();
        let name = object.metadata.name.as_str();
        let mutate = &mutate;
        retry_on_conflict(&self.retry, move || async move {
            let mut latest = self.get::<S>(namespace, name).await?;
            let before = latest.status.clone();
            mutate(&mut latest.status);
            if latest.status == before {
                return Ok(latest);
            }
            self.update_status(&latest).await
        })
        .await
    }

    /// Apply `mutate` to the latest spec under conflict retry. Nothing is
    /// written when the mutation leaves the spec unchanged.
    pub async fn update_spec_with_retry<S, F>(
        &self,
        object: &Resource<S>,
        mutate: F,
    ) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        F: Fn(&mut S) + Send + Sync,
    {
        let namespace = object.metadata.namespace.as_str();
        let name = object.metadata.name.as_str();
        let mutate = &mutate;
        retry_on_conflict(&self.retry, move || async move {
            let mut latest = self.get::<S>(namespace, name).await?;
            let before = latest.spec.clone();
            mutate(&mut latest.spec);
            if latest.spec == before {
                return Ok(latest);
            }
            self.update(&latest).await
        })
        .await
    }

    /// Apply `mutate` to the latest metadata and spec under conflict retry.
    /// Used for finalizer changes. Status changes made by `mutate` are
    /// discarded.
    pub async fn update_with_retry<S, F>(
        &self,
        object: &Resource<S>,
        mutate: F,
    ) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        F: Fn(&mut Resource<S>) + Send + Sync,
    {
        let namespace = object.metadata.namespace.as_str();
        let name = object.metadata.name.as_str();
        let mutate = &mutate;
        retry_on_conflict(&self.retry, move || async move {
            let mut latest = self.get::<S>(namespace, name).await?;
            let before = latest.clone();
            mutate(&mut latest);
            if latest.metadata == before.metadata && latest.spec == before.spec {
                return Ok(latest);
            }
            self.update(&latest).await
        })
        .await
    }

    async fn current<S: ResourceSpec>(
        &self,
        key: &ObjectKey,
        expected_version: u64,
    ) -> Result<Resource<S>> {
        let raw = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found(&key.kind, &key.name))?;
        if raw.resource_version != expected_version {
            return Err(Error::conflict(&key.kind, &key.name));
        }
        decode(raw)
    }
}

fn decode<S: ResourceSpec>(raw: RawObject) -> Result<Resource<S>> {
    let mut object: Resource<S> = serde_json::from_value(raw.body)?;
    object.metadata.resource_version = raw.resource_version;
    Ok(object)
}
