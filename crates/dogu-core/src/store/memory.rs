// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object store.
//!
//! Used by tests and by embedders that do not need durability. Supports
//! injecting write conflicts and read failures to exercise retry paths.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};

use super::{
    ObjectStore, RawObject, UpdateScope, WATCH_CHANNEL_CAPACITY, WatchEvent, WatchEventKind,
};
use crate::error::{Error, Result};
use crate::model::ObjectKey;

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, (u64, Value)>,
    last_version: u64,
    pending_conflicts: u32,
    failing_gets: HashSet<ObjectKey>,
}

/// Object store keeping everything in a map.
pub struct MemoryObjectStore {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Make the next `count` replace calls fail with a conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.lock().await.pending_conflicts = count;
    }

    /// Make reads of `key` fail with a store error until cleared.
    pub async fn fail_gets(&self, key: ObjectKey) {
        self.state.lock().await.failing_gets.insert(key);
    }

    /// Stop failing reads of `key`.
    pub async fn clear_failures(&self, key: &ObjectKey) {
        self.state.lock().await.failing_gets.remove(key);
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn publish(&self, key: &ObjectKey, kind: WatchEventKind) {
        // No receivers is fine.
        let _ = self.events.send(WatchEvent {
            key: key.clone(),
            kind,
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>> {
        let state = self.state.lock().await;
        if state.failing_gets.contains(key) {
            return Err(Error::store("get", format!("injected read failure for {key}")));
        }
        Ok(state.objects.get(key).map(|(version, body)| RawObject {
            key: key.clone(),
            resource_version: *version,
            body: body.clone(),
        }))
    }

    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<RawObject>> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(key, (version, body))| RawObject {
                key: key.clone(),
                resource_version: *version,
                body: body.clone(),
            })
            .collect())
    }

    async fn create(&self, key: &ObjectKey, body: Value) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.objects.contains_key(key) {
            return Err(Error::AlreadyExists {
                kind: key.kind.clone(),
                name: key.name.clone(),
            });
        }
        state.last_version += 1;
        let version = state.last_version;
        state.objects.insert(key.clone(), (version, body));
        drop(state);

        self.publish(key, WatchEventKind::Created);
        Ok(version)
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        body: Value,
        scope: UpdateScope,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(Error::conflict(&key.kind, &key.name));
        }

        let stored_version = match state.objects.get(key) {
            Some((version, _)) => *version,
            None => return Err(Error::not_found(&key.kind, &key.name)),
        };
        if stored_version != expected_version {
            return Err(Error::conflict(&key.kind, &key.name));
        }

        state.last_version += 1;
        let version = state.last_version;
        state.objects.insert(key.clone(), (version, body));
        drop(state);

        self.publish(key, scope.into());
        Ok(version)
    }

    async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(expected) = expected_version
            && let Some((version, _)) = state.objects.get(key)
            && *version != expected
        {
            return Err(Error::conflict(&key.kind, &key.name));
        }
        let removed = state.objects.remove(key).is_some();
        drop(state);

        if removed {
            self.publish(key, WatchEventKind::Deleted);
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
