// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Turns the outcome of a pass into a scheduling decision.
//!
//! The [`RequeueHandler`] owns the timing policy of the dogu reconciler: it
//! persists the chosen delay as `status.requeueTime`, reports an event, and
//! hands the controller an [`Action`]. It never returns an error, so the
//! controller has no reason to add its own backoff on top.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use crate::events::{Event, EventRecorder, reason};
use crate::model::{Dogu, DoguSpec};
use crate::store::Client;

/// What the controller should do with an object after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the delay.
    Requeue(Duration),
    /// Wait for the next change notification.
    AwaitChange,
}

impl Action {
    /// Requeue delay, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Requeue(delay) => Some(*delay),
            Self::AwaitChange => None,
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueConfig {
    /// Lower bound of the delay after a failed pass.
    pub min_backoff: Duration,
    /// Delay after a permanent failure. Spec changes re-trigger earlier.
    pub permanent_backoff: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(10),
            permanent_backoff: Duration::from_secs(600),
        }
    }
}

/// Persists requeue decisions for dogus.
pub struct RequeueHandler {
    client: Client,
    recorder: Arc<dyn EventRecorder>,
    config: RequeueConfig,
}

impl RequeueHandler {
    /// Create a handler.
    pub fn new(client: Client, recorder: Arc<dyn EventRecorder>, config: RequeueConfig) -> Self {
        Self {
            client,
            recorder,
            config,
        }
    }

    /// Backoff configuration.
    pub fn config(&self) -> &RequeueConfig {
        &self.config
    }

    /// Decide, persist and report what happens after a pass over `dogu` that
    /// ended with `error` and asked for `requeue_after`.
    pub async fn handle(
        &self,
        dogu: &Dogu,
        error: Option<&Error>,
        requeue_after: Duration,
    ) -> Action {
        if dogu.metadata.is_deleting() || dogu.ensure_identity().is_err() {
            return Action::AwaitChange;
        }

        let latest = match self
            .client
            .get_opt::<DoguSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await
        {
            Ok(Some(latest)) if !latest.metadata.is_deleting() => latest,
            Ok(_) => return Action::AwaitChange,
            Err(e) => return self.persist_failed(dogu, error, &e).await,
        };

        let delay = match error {
            Some(e) if e.is_permanent() => requeue_after.max(self.config.permanent_backoff),
            Some(_) => requeue_after.max(self.config.min_backoff),
            None => requeue_after,
        };

        if let Err(e) = self
            .client
            .update_status_with_retry(&latest, |status| status.requeue_time = delay)
            .await
        {
            return self.persist_failed(dogu, error, &e).await;
        }

        let object = dogu.reference();
        match error {
            Some(e) => {
                warn!(
                    dogu = %dogu.metadata.name,
                    error = %e,
                    code = e.code(),
                    requeue_after_ms = delay.as_millis() as u64,
                    "Reconciliation failed, requeueing"
                );
                self.recorder
                    .record(Event::warning(
                        object,
                        reason::RECONCILE_FAIL,
                        format!("Trying again in {delay:?}: {e}"),
                    ))
                    .await;
                Action::Requeue(delay)
            }
            None if !delay.is_zero() => {
                debug!(
                    dogu = %dogu.metadata.name,
                    requeue_after_ms = delay.as_millis() as u64,
                    "Requeueing"
                );
                self.recorder
                    .record(Event::normal(
                        object,
                        reason::REQUEUE,
                        format!("Trying again in {delay:?}"),
                    ))
                    .await;
                Action::Requeue(delay)
            }
            None => {
                debug!(dogu = %dogu.metadata.name, "Dogu is synced");
                self.recorder
                    .record(Event::normal(object, reason::RECONCILE_OK, "Dogu is synced"))
                    .await;
                Action::AwaitChange
            }
        }
    }

    async fn persist_failed(&self, dogu: &Dogu, error: Option<&Error>, cause: &Error) -> Action {
        let delay = self.config.min_backoff;
        warn!(
            dogu = %dogu.metadata.name,
            error = %cause,
            requeue_after_ms = delay.as_millis() as u64,
            "Failed to persist requeue time"
        );
        let message = match error {
            Some(e) => {
                format!("Trying again in {delay:?}: {e}; requeue time not persisted: {cause}")
            }
            None => format!("Trying again in {delay:?}: requeue time not persisted: {cause}"),
        };
        self.recorder
            .record(Event::warning(dogu.reference(), reason::RECONCILE_FAIL, message))
            .await;
        Action::Requeue(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventRecorder;
    use crate::model::ObjectMeta;
    use crate::store::{MemoryObjectStore, RetryPolicy};

    struct Harness {
        store: Arc<MemoryObjectStore>,
        client: Client,
        recorder: Arc<MemoryEventRecorder>,
        handler: RequeueHandler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryObjectStore::new());
        let client = Client::new(store.clone()).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        });
        let recorder = Arc::new(MemoryEventRecorder::new());
        let handler =
            RequeueHandler::new(client.clone(), recorder.clone(), RequeueConfig::default());
        Harness {
            store,
            client,
            recorder,
            handler,
        }
    }

    async fn ldap(client: &Client) -> Dogu {
        client
            .create(&Dogu::new(
                ObjectMeta::new("ecosystem", "ldap"),
                DoguSpec::new("official/ldap", "2.6.2-1"),
            ))
            .await
            .unwrap()
    }

    async fn requeue_time(client: &Client) -> Duration {
        client
            .get::<DoguSpec>("ecosystem", "ldap")
            .await
            .unwrap()
            .status
            .requeue_time
    }

    #[tokio::test]
    async fn test_error_uses_at_least_min_backoff() {
        let h = harness();
        let dogu = ldap(&h.client).await;
        let err = Error::service("registry", "unavailable");

        let action = h.handler.handle(&dogu, Some(&err), Duration::from_secs(1)).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(10)));
        assert_eq!(requeue_time(&h.client).await, Duration::from_secs(10));

        let action = h.handler.handle(&dogu, Some(&err), Duration::from_secs(30)).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(30)));
        assert_eq!(h.recorder.reasons().await, vec![reason::RECONCILE_FAIL; 2]);
    }

    #[tokio::test]
    async fn test_permanent_error_uses_slow_backoff() {
        let h = harness();
        let dogu = ldap(&h.client).await;
        let err = Error::validation("spec.version", "downgrade");

        let action = h.handler.handle(&dogu, Some(&err), Duration::ZERO).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_success_without_delay_resets_requeue_time() {
        let h = harness();
        let dogu = ldap(&h.client).await;
        h.handler
            .handle(&dogu, Some(&Error::service("registry", "down")), Duration::ZERO)
            .await;

        let action = h.handler.handle(&dogu, None, Duration::ZERO).await;
        assert_eq!(action, Action::AwaitChange);
        assert_eq!(requeue_time(&h.client).await, Duration::ZERO);
        assert_eq!(
            h.recorder.reasons().await,
            vec![reason::RECONCILE_FAIL, reason::RECONCILE_OK]
        );
    }

    #[tokio::test]
    async fn test_success_with_delay_requeues() {
        let h = harness();
        let dogu = ldap(&h.client).await;

        let action = h.handler.handle(&dogu, None, Duration::from_secs(3)).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(3)));
        assert_eq!(requeue_time(&h.client).await, Duration::from_secs(3));
        assert_eq!(h.recorder.reasons().await, vec![reason::REQUEUE]);
    }

    #[tokio::test]
    async fn test_deleted_or_deleting_dogu_is_left_alone() {
        let h = harness();
        let dogu = ldap(&h.client).await;

        let mut deleting = dogu.clone();
        deleting.metadata.deletion_timestamp = Some(chrono::Utc::now());
        let action = h
            .handler
            .handle(&deleting, Some(&Error::service("x", "y")), Duration::ZERO)
            .await;
        assert_eq!(action, Action::AwaitChange);

        h.client.delete::<DoguSpec>("ecosystem", "ldap").await.unwrap();
        let action = h.handler.handle(&dogu, None, Duration::ZERO).await;
        assert_eq!(action, Action::AwaitChange);
        assert!(h.recorder.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_unnamed_dogu_is_left_alone() {
        let h = harness();
        let dogu = Dogu::new(ObjectMeta::default(), DoguSpec::default());
        assert_eq!(h.handler.handle(&dogu, None, Duration::ZERO).await, Action::AwaitChange);
    }

    #[tokio::test]
    async fn test_status_write_failure_still_requeues() {
        let h = harness();
        let dogu = ldap(&h.client).await;
        h.store.inject_conflicts(100).await;

        let err = Error::service("registry", "down");
        let action = h.handler.handle(&dogu, Some(&err), Duration::ZERO).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(10)));
        let events = h.recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, reason::RECONCILE_FAIL);
        assert!(events[0].message.contains("not persisted"));
    }

    #[tokio::test]
    async fn test_fetch_failure_still_requeues() {
        let h = harness();
        let dogu = ldap(&h.client).await;
        h.store.fail_gets(dogu.key()).await;

        let err = Error::service("registry", "down");
        let action = h.handler.handle(&dogu, Some(&err), Duration::ZERO).await;
        assert_eq!(action, Action::Requeue(Duration::from_secs(10)));
        assert_eq!(h.recorder.reasons().await, vec![reason::RECONCILE_FAIL]);
    }
}
