// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watch-driven controller loop.
//!
//! The controller subscribes to store changes, maps each change to the dogu
//! or restart it concerns and runs reconciliation passes on a bounded set of
//! workers. Requeue decisions go back into the [`WorkQueue`]; a periodic
//! resync re-enqueues every object so lost notifications heal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use dogu_core::model::{
    DeploymentSpec, DoguRestartSpec, DoguSpec, ResourceSpec, ServiceSpec, VolumeClaimSpec,
};
use dogu_core::store::{WatchEvent, WatchEventKind};
use dogu_core::{Action, Client, DoguReconciler, ObjectKey, RestartReconciler};

use crate::queue::WorkQueue;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace whose objects are reconciled
    pub namespace: String,
    /// How often every object is re-enqueued
    pub resync_interval: Duration,
    /// Maximum passes running at once
    pub max_concurrent: usize,
    /// Delay after a pass that returned an error
    pub error_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "ecosystem".to_string(),
            resync_interval: Duration::from_secs(300),
            max_concurrent: 4,
            error_backoff: Duration::from_secs(10),
        }
    }
}

/// Reconciles dogus and restarts of one namespace.
pub struct Controller {
    client: Client,
    dogus: Arc<DoguReconciler>,
    restarts: Arc<RestartReconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    shutdown: Arc<Notify>,
}

impl Controller {
    /// Create a controller.
    pub fn new(
        client: Client,
        dogus: DoguReconciler,
        restarts: RestartReconciler,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            dogus: Arc::new(dogus),
            restarts: Arc::new(restarts),
            queue: Arc::new(WorkQueue::new()),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    ///
    /// `notify_one` stops the loop even when it is busy at that moment.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// The queue feeding the workers.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run the controller loop until shutdown is signalled or the watch
    /// channel closes.
    pub async fn run(self) {
        info!(
            namespace = %self.config.namespace,
            max_concurrent = self.config.max_concurrent,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Controller started"
        );

        // Subscribe before listing so no change between the two is missed.
        let mut watch = self.client.watch();
        self.enqueue_all().await;

        let mut workers = JoinSet::new();
        let mut resync = tokio::time::interval_at(
            Instant::now() + self.config.resync_interval,
            self.config.resync_interval,
        );

        loop {
            self.dispatch(&mut workers);
            let has_capacity = workers.len() < self.config.max_concurrent;
            let deadline = self.queue.next_deadline();

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Controller shutting down");
                    break;
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "Reconcile worker panicked");
                    }
                }

                received = watch.recv() => match received {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch lagged, resyncing");
                        self.enqueue_all().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Watch channel closed");
                        break;
                    }
                },

                _ = resync.tick() => {
                    debug!("Periodic resync");
                    self.enqueue_all().await;
                }

                _ = sleep_until(deadline), if has_capacity && deadline.is_some() => {}
            }
        }

        workers.abort_all();
        while workers.join_next().await.is_some() {}
        info!("Controller stopped");
    }

    /// Start passes for ready keys while workers are free.
    fn dispatch(&self, workers: &mut JoinSet<()>) {
        while workers.len() < self.config.max_concurrent {
            let Some(key) = self.queue.pop_ready() else {
                break;
            };
            let worker = Worker {
                dogus: self.dogus.clone(),
                restarts: self.restarts.clone(),
                queue: self.queue.clone(),
                error_backoff: self.config.error_backoff,
            };
            workers.spawn(worker.process(key));
        }
    }

    fn on_event(&self, event: WatchEvent) {
        if let Some(key) = owner_of(&event, &self.config.namespace) {
            self.queue.add(key, Duration::ZERO);
        }
    }

    async fn enqueue_all(&self) {
        let namespace = &self.config.namespace;
        let dogus = self.client.store().list(DoguSpec::KIND, namespace).await;
        let restarts = self.client.store().list(DoguRestartSpec::KIND, namespace).await;

        for listed in [dogus, restarts] {
            match listed {
                Ok(objects) => {
                    for object in objects {
                        self.queue.add(object.key, Duration::ZERO);
                    }
                }
                Err(e) => error!(error = %e, "Failed to list objects for resync"),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

/// The object whose pass should run after `event`.
///
/// Status writes to dogus and restarts come from passes themselves and are
/// ignored. Workloads carry the name of the dogu they belong to.
fn owner_of(event: &WatchEvent, namespace: &str) -> Option<ObjectKey> {
    let key = &event.key;
    if key.namespace != namespace {
        return None;
    }

    match key.kind.as_str() {
        DoguSpec::KIND | DoguRestartSpec::KIND => match event.kind {
            WatchEventKind::StatusUpdated | WatchEventKind::Deleted => None,
            WatchEventKind::Created | WatchEventKind::Updated => Some(key.clone()),
        },
        DeploymentSpec::KIND | VolumeClaimSpec::KIND | ServiceSpec::KIND => {
            Some(ObjectKey::of::<DoguSpec>(namespace, &key.name))
        }
        _ => None,
    }
}

/// One reconciliation pass.
struct Worker {
    dogus: Arc<DoguReconciler>,
    restarts: Arc<RestartReconciler>,
    queue: Arc<WorkQueue>,
    error_backoff: Duration,
}

impl Worker {
    async fn process(self, key: ObjectKey) {
        let _in_flight = InFlight {
            queue: self.queue.clone(),
            key: key.clone(),
        };

        let result = match key.kind.as_str() {
            DoguSpec::KIND => self.dogus.reconcile(&key.namespace, &key.name).await,
            DoguRestartSpec::KIND => self.restarts.reconcile(&key.namespace, &key.name).await,
            other => {
                debug!(kind = other, "No reconciler for kind");
                return;
            }
        };

        match result {
            Ok(Action::Requeue(delay)) => {
                debug!(object = %key, delay_ms = delay.as_millis() as u64, "Requeued");
                self.queue.add(key, delay);
            }
            Ok(Action::AwaitChange) => debug!(object = %key, "Converged"),
            Err(e) => {
                warn!(object = %key, error = %e, "Reconcile failed");
                self.queue.add(key, self.error_backoff);
            }
        }
    }
}

/// Releases the key when the pass ends, including by panic or abort.
struct InFlight {
    queue: Arc<WorkQueue>,
    key: ObjectKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, name: &str, change: WatchEventKind) -> WatchEvent {
        WatchEvent {
            key: ObjectKey::new(kind, "ecosystem", name),
            kind: change,
        }
    }

    #[test]
    fn test_dogu_spec_changes_enqueue_the_dogu() {
        let created = event("Dogu", "ldap", WatchEventKind::Created);
        let updated = event("Dogu", "ldap", WatchEventKind::Updated);

        assert_eq!(owner_of(&created, "ecosystem"), Some(created.key.clone()));
        assert_eq!(owner_of(&updated, "ecosystem"), Some(updated.key.clone()));
    }

    #[test]
    fn test_status_writes_are_ignored() {
        let dogu = event("Dogu", "ldap", WatchEventKind::StatusUpdated);
        let restart = event(DoguRestartSpec::KIND, "ldap-restart", WatchEventKind::StatusUpdated);

        assert_eq!(owner_of(&dogu, "ecosystem"), None);
        assert_eq!(owner_of(&restart, "ecosystem"), None);
    }

    #[test]
    fn test_workload_changes_enqueue_the_owning_dogu() {
        let rollout = event(DeploymentSpec::KIND, "ldap", WatchEventKind::StatusUpdated);
        let claim = event(VolumeClaimSpec::KIND, "ldap", WatchEventKind::Updated);

        let dogu = ObjectKey::of::<DoguSpec>("ecosystem", "ldap");
        assert_eq!(owner_of(&rollout, "ecosystem"), Some(dogu.clone()));
        assert_eq!(owner_of(&claim, "ecosystem"), Some(dogu));
    }

    #[test]
    fn test_other_namespaces_and_kinds_are_ignored() {
        let foreign = WatchEvent {
            key: ObjectKey::new("Dogu", "staging", "ldap"),
            kind: WatchEventKind::Created,
        };
        let config = event("ConfigMap", "ldap-config", WatchEventKind::Updated);

        assert_eq!(owner_of(&foreign, "ecosystem"), None);
        assert_eq!(owner_of(&config, "ecosystem"), None);
    }
}
