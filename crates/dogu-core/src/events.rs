// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource events.
//!
//! Every retried or terminal outcome is reported as an [`Event`] on the
//! affected object. Recorders decide where events go: the log, the object
//! store, memory (tests), or several of those at once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{EventObject, EventSpec, ObjectMeta, ObjectReference};
use crate::store::Client;

/// Event reasons.
pub mod reason {
    /// A reconciliation pass failed.
    pub const RECONCILE_FAIL: &str = "ReasonReconcileFail";
    /// A reconciliation pass asked to be repeated later.
    pub const REQUEUE: &str = "Requeue";
    /// A reconciliation pass converged.
    pub const RECONCILE_OK: &str = "ReasonReconcileOK";
    /// The spec cannot be applied.
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A cleanup step failed but deletion continued.
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
    /// A volume resize started.
    pub const RESIZE_STARTED: &str = "ResizeStarted";
    /// A volume resize finished.
    pub const RESIZE_FINISHED: &str = "ResizeFinished";
    /// A volume resize step failed.
    pub const RESIZE_FAILED: &str = "ResizeFailed";
    /// Restart: stopping the dogu.
    pub const STOPPING: &str = "Stopping";
    /// Restart: the dogu is stopped.
    pub const STOPPED: &str = "Stopped";
    /// Restart: starting the dogu.
    pub const STARTING: &str = "Starting";
    /// Restart: the dogu is running again.
    pub const STARTED: &str = "Started";
    /// Restart: setting the stopped flag failed.
    pub const FAILED_STOP: &str = "FailedStop";
    /// Restart: clearing the stopped flag failed.
    pub const FAILED_START: &str = "FailedStart";
    /// Restart: the dogu could not be loaded.
    pub const FAILED_GET_DOGU: &str = "FailedGetDogu";
    /// Restart: the dogu does not exist.
    pub const DOGU_NOT_FOUND: &str = "DoguNotFound";
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Informational.
    Normal,
    /// Something went wrong.
    Warning,
}

impl EventType {
    /// Returns the string representation of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        }
    }
}

/// An event about an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Object the event is about.
    pub object: ObjectReference,
    /// Severity.
    pub event_type: EventType,
    /// Short machine-readable reason, see [`reason`].
    pub reason: &'static str,
    /// Human-readable message.
    pub message: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Informational event.
    pub fn normal(
        object: ObjectReference,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(object, EventType::Normal, reason, message)
    }

    /// Warning event.
    pub fn warning(
        object: ObjectReference,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(object, EventType::Warning, reason, message)
    }

    fn new(
        object: ObjectReference,
        event_type: EventType,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object,
            event_type,
            reason,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for events. Recording is fire-and-forget: recorders log their own
/// failures instead of returning them.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event.
    async fn record(&self, event: Event);
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Reasons of all recorded events, oldest first.
    pub async fn reasons(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.reason).collect()
    }

    /// Drop all recorded events.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, event: Event) {
        self.events.lock().await.push(event);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventRecorder;

#[async_trait]
impl EventRecorder for TracingEventRecorder {
    async fn record(&self, event: Event) {
        let object = format!(
            "{}/{}/{}",
            event.object.kind, event.object.namespace, event.object.name
        );
        match event.event_type {
            EventType::Normal => info!(%object, reason = event.reason, "{}", event.message),
            EventType::Warning => warn!(%object, reason = event.reason, "{}", event.message),
        }
    }
}

/// Persists events as `Event` objects next to the object they are about.
///
/// Repeated events are folded into one object per involved object and
/// reason: the count goes up and the latest message and timestamp replace
/// the previous ones.
pub struct StoreEventRecorder {
    client: Client,
}

impl StoreEventRecorder {
    /// Create a recorder writing through the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Name of the object aggregating `event`.
    pub fn object_name(event: &Event) -> String {
        format!(
            "{}.{}.{}",
            event.object.name,
            event.object.kind.to_lowercase(),
            event.reason.to_lowercase()
        )
    }

    async fn persist(&self, event: &Event) -> Result<()> {
        let namespace = event.object.namespace.as_str();
        let name = Self::object_name(event);

        if let Some(existing) = self.client.get_opt::<EventSpec>(namespace, &name).await? {
            return self.bump(&existing, event).await;
        }

        let object = EventObject::new(
            ObjectMeta::new(namespace, name.as_str()),
            EventSpec {
                involved_object: event.object.clone(),
                event_type: event.event_type.as_str().to_string(),
                reason: event.reason.to_string(),
                message: event.message.clone(),
                count: 1,
                first_timestamp: event.timestamp,
                timestamp: event.timestamp,
            },
        );
        match self.client.create(&object).await {
            Ok(_) => Ok(()),
            Err(Error::AlreadyExists { .. }) => {
                let existing = self.client.get::<EventSpec>(namespace, &name).await?;
                self.bump(&existing, event).await
            }
            Err(e) => Err(e),
        }
    }

    async fn bump(&self, existing: &EventObject, event: &Event) -> Result<()> {
        self.client
            .update_spec_with_retry(existing, |spec| {
                spec.count = spec.count.saturating_add(1);
                spec.event_type = event.event_type.as_str().to_string();
                spec.message = event.message.clone();
                spec.timestamp = event.timestamp;
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventRecorder for StoreEventRecorder {
    async fn record(&self, event: Event) {
        if let Err(e) = self.persist(&event).await {
            warn!(reason = event.reason, error = %e, "Failed to persist event");
        }
    }
}

/// Forwards every event to several recorders.
#[derive(Default)]
pub struct FanoutEventRecorder {
    recorders: Vec<Arc<dyn EventRecorder>>,
}

impl FanoutEventRecorder {
    /// Create a recorder with no targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target.
    pub fn with(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorders.push(recorder);
        self
    }
}

#[async_trait]
impl EventRecorder for FanoutEventRecorder {
    async fn record(&self, event: Event) {
        for recorder in &self.recorders {
            recorder.record(event.clone()).await;
        }
    }
}
