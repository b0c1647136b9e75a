// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dogu-core integration tests.
//!
//! Provides a [`Harness`] wiring both reconcilers to an in-memory store, and
//! stand-ins for the parts of the cluster that report observed state.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use dogu_core::events::{Event, MemoryEventRecorder};
use dogu_core::model::{
    DeploymentSpec, Dogu, DoguRestart, DoguRestartSpec, DoguSpec, ObjectMeta, VolumeClaimSpec,
};
use dogu_core::requeue::{Action, RequeueConfig};
use dogu_core::restart::{RestartConfig, RestartReconciler};
use dogu_core::services::ServiceAccountManager;
use dogu_core::steps::{ApplyConfig, StepContext};
use dogu_core::workflow::resize::ResizeConfig;
use dogu_core::{Client, DoguReconciler, Error, MemoryObjectStore, Result};

pub const NAMESPACE: &str = "ecosystem";

/// Reconcilers over a shared in-memory store.
pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub client: Client,
    pub recorder: Arc<MemoryEventRecorder>,
    pub dogus: DoguReconciler,
    pub restarts: RestartReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Harness whose steps use the given service account manager.
    pub fn with_accounts(accounts: Arc<dyn ServiceAccountManager>) -> Self {
        Self::build(Some(accounts))
    }

    fn build(accounts: Option<Arc<dyn ServiceAccountManager>>) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        let client = Client::new(store.clone());
        let recorder = Arc::new(MemoryEventRecorder::new());

        let mut ctx = StepContext::store_backed(client.clone(), ApplyConfig::default());
        if let Some(accounts) = accounts {
            ctx.accounts = accounts;
        }

        let dogus = DoguReconciler::new(
            ctx,
            recorder.clone(),
            RequeueConfig::default(),
            ResizeConfig::default(),
        );
        let restarts =
            RestartReconciler::new(client.clone(), recorder.clone(), RestartConfig::default());

        Self {
            store,
            client,
            recorder,
            dogus,
            restarts,
        }
    }

    // ========================================================================
    // Objects
    // ========================================================================

    pub async fn create_dogu(&self, name: &str, spec: DoguSpec) -> Dogu {
        self.client
            .create(&Dogu::new(ObjectMeta::new(NAMESPACE, name), spec))
            .await
            .expect("Failed to create dogu")
    }

    pub async fn dogu(&self, name: &str) -> Dogu {
        self.client
            .get::<DoguSpec>(NAMESPACE, name)
            .await
            .expect("Failed to get dogu")
    }

    pub async fn edit_dogu<F>(&self, name: &str, mutate: F) -> Dogu
    where
        F: Fn(&mut DoguSpec) + Send + Sync,
    {
        let dogu = self.dogu(name).await;
        self.client
            .update_spec_with_retry(&dogu, mutate)
            .await
            .expect("Failed to edit dogu")
    }

    pub async fn create_restart(&self, name: &str, dogu: &str) -> DoguRestart {
        self.client
            .create(&DoguRestart::new(
                ObjectMeta::new(NAMESPACE, name),
                DoguRestartSpec::new(dogu),
            ))
            .await
            .expect("Failed to create restart")
    }

    pub async fn restart(&self, name: &str) -> Option<DoguRestart> {
        self.client
            .get_opt::<DoguRestartSpec>(NAMESPACE, name)
            .await
            .expect("Failed to get restart")
    }

    pub async fn deployment(&self, name: &str) -> Option<dogu_core::model::Deployment> {
        self.client
            .get_opt::<DeploymentSpec>(NAMESPACE, name)
            .await
            .expect("Failed to get deployment")
    }

    pub async fn claim(&self, name: &str) -> Option<dogu_core::model::VolumeClaim> {
        self.client
            .get_opt::<VolumeClaimSpec>(NAMESPACE, name)
            .await
            .expect("Failed to get claim")
    }

    // ========================================================================
    // Passes
    // ========================================================================

    pub async fn reconcile_dogu(&self, name: &str) -> Action {
        self.dogus
            .reconcile(NAMESPACE, name)
            .await
            .expect("Dogu pass failed")
    }

    pub async fn reconcile_restart(&self, name: &str) -> Action {
        self.restarts
            .reconcile(NAMESPACE, name)
            .await
            .expect("Restart pass failed")
    }

    /// Alternate dogu passes and settled deployments until a pass waits for
    /// the next change.
    pub async fn converge(&self, name: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        for _ in 0..20 {
            let action = self.reconcile_dogu(name).await;
            actions.push(action);
            if action == Action::AwaitChange {
                return actions;
            }
            self.settle_deployment(name).await;
            self.bind_claim(name).await;
        }
        panic!("dogu {name} did not converge: {actions:?}");
    }

    // ========================================================================
    // Cluster stand-ins
    // ========================================================================

    /// Report the deployment as running exactly its desired replicas.
    pub async fn settle_deployment(&self, name: &str) {
        let Some(deployment) = self.deployment(name).await else {
            return;
        };
        let replicas = deployment.spec.replicas;
        self.client
            .update_status_with_retry(&deployment, |status| {
                status.replicas = replicas;
                status.ready_replicas = replicas;
            })
            .await
            .expect("Failed to settle deployment");
    }

    /// Report the claim's capacity as its requested size.
    pub async fn bind_claim(&self, name: &str) {
        let Some(claim) = self.claim(name).await else {
            return;
        };
        let requested = claim.spec.requested.clone();
        self.client
            .update_status_with_retry(&claim, |status| status.capacity = requested.clone())
            .await
            .expect("Failed to bind claim");
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Reasons of events recorded for objects of `kind`, oldest first.
    pub async fn reasons_for(&self, kind: &str) -> Vec<&'static str> {
        self.recorder
            .events()
            .await
            .iter()
            .filter(|e| e.object.kind == kind)
            .map(|e| e.reason)
            .collect()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.recorder.events().await
    }
}

/// Service account manager failing a fixed number of calls.
pub struct FlakyAccounts {
    create_failures: AtomicU32,
    remove_failures: AtomicU32,
}

impl FlakyAccounts {
    pub fn new(create_failures: u32, remove_failures: u32) -> Self {
        Self {
            create_failures: AtomicU32::new(create_failures),
            remove_failures: AtomicU32::new(remove_failures),
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ServiceAccountManager for FlakyAccounts {
    async fn create(&self, _dogu: &Dogu) -> Result<()> {
        if Self::take(&self.create_failures) {
            return Err(Error::service("service-accounts", "account provider unreachable"));
        }
        Ok(())
    }

    async fn remove(&self, _dogu: &Dogu) -> Result<()> {
        if Self::take(&self.remove_failures) {
            return Err(Error::service("service-accounts", "account provider unreachable"));
        }
        Ok(())
    }
}
