// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume resize workflow driven through the dogu reconciler.

mod common;

use std::time::Duration;

use common::*;
use dogu_core::events::reason;
use dogu_core::model::{DoguPhase, DoguSpec, VolumeClaimCondition, VolumeClaimStatus};
use dogu_core::steps::{ApplyConfig, StepContext};
use dogu_core::workflow::resize::{EDIT_PVC, ResizeConfig, SCALE_UP, WAIT_FOR_RESIZE};
use dogu_core::{Action, DoguReconciler, RequeueConfig};

fn redmine(size: &str) -> DoguSpec {
    let mut spec = DoguSpec::new("official/redmine", "5.1.3-1");
    spec.resources.data_volume_size = Some(size.to_string());
    spec
}

async fn installed(size: &str) -> Harness {
    let h = Harness::new();
    h.create_dogu("redmine", redmine(size)).await;
    h.converge("redmine").await;
    assert_eq!(h.claim("redmine").await.unwrap().status.capacity, size);
    h
}

#[tokio::test]
async fn test_resize_one_step_per_pass() {
    let h = installed("1Gi").await;
    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("2Gi".to_string())
    })
    .await;

    // Start + scale down.
    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(1))
    );
    let dogu = h.dogu("redmine").await;
    assert_eq!(dogu.status.phase, DoguPhase::Resizing);
    assert_eq!(dogu.status.requeue_phase, EDIT_PVC);
    let params = dogu.status.resize.clone().unwrap();
    assert_eq!(params.target_size, "2Gi");
    assert_eq!(params.original_replicas, Some(1));
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 0);

    // Edit the claim.
    h.reconcile_dogu("redmine").await;
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, WAIT_FOR_RESIZE);
    assert_eq!(h.claim("redmine").await.unwrap().spec.requested, "2Gi");

    // Capacity still 1Gi: poll without moving on.
    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(5))
    );
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, WAIT_FOR_RESIZE);

    h.bind_claim("redmine").await;
    h.reconcile_dogu("redmine").await;
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, SCALE_UP);

    // Scale up finishes the workflow.
    h.reconcile_dogu("redmine").await;
    let dogu = h.dogu("redmine").await;
    assert_eq!(dogu.status.phase, DoguPhase::Installed);
    assert!(dogu.status.requeue_phase.is_empty());
    assert!(dogu.status.resize.is_none());
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 1);

    let reasons = h.reasons_for("Dogu").await;
    assert!(reasons.contains(&reason::RESIZE_STARTED));
    assert!(reasons.contains(&reason::RESIZE_FINISHED));

    // Back on the apply pipeline, no second resize.
    h.converge("redmine").await;
    assert_eq!(h.dogu("redmine").await.status.phase, DoguPhase::Installed);
    assert_eq!(h.claim("redmine").await.unwrap().spec.requested, "2Gi");
}

#[tokio::test]
async fn test_resize_waits_for_filesystem() {
    let h = installed("1Gi").await;
    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("2Gi".to_string())
    })
    .await;
    h.reconcile_dogu("redmine").await;
    h.reconcile_dogu("redmine").await;

    // Capacity reached but the node still has to grow the filesystem.
    let claim = h.claim("redmine").await.unwrap();
    h.client
        .update_status_with_retry(&claim, |status| {
            status.capacity = "2Gi".to_string();
            status.conditions = vec![VolumeClaimCondition {
                condition_type: VolumeClaimStatus::FILE_SYSTEM_RESIZE_PENDING.to_string(),
                status: true,
            }];
        })
        .await
        .unwrap();
    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(5))
    );
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, WAIT_FOR_RESIZE);

    let claim = h.claim("redmine").await.unwrap();
    h.client
        .update_status_with_retry(&claim, |status| status.conditions.clear())
        .await
        .unwrap();
    h.reconcile_dogu("redmine").await;
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, SCALE_UP);
}

#[tokio::test]
async fn test_resize_of_stopped_dogu_stays_stopped() {
    let h = installed("1Gi").await;
    h.edit_dogu("redmine", |spec| spec.stopped = true).await;
    h.converge("redmine").await;

    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("4Gi".to_string())
    })
    .await;
    for _ in 0..4 {
        h.reconcile_dogu("redmine").await;
        h.bind_claim("redmine").await;
    }

    let dogu = h.dogu("redmine").await;
    assert!(dogu.status.requeue_phase.is_empty());
    assert_eq!(dogu.status.phase, DoguPhase::Stopped);
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 0);
    assert_eq!(h.claim("redmine").await.unwrap().spec.requested, "4Gi");
}

#[tokio::test]
async fn test_shrink_is_rejected() {
    let h = installed("2Gi").await;
    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("1Gi".to_string())
    })
    .await;

    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(600))
    );
    let dogu = h.dogu("redmine").await;
    assert_eq!(dogu.status.phase, DoguPhase::ValidationFailed);
    assert!(dogu.status.requeue_phase.is_empty());
    assert_eq!(h.claim("redmine").await.unwrap().spec.requested, "2Gi");
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 1);
}

#[tokio::test]
async fn test_interrupted_resize_resumes_from_recorded_step() {
    let h = installed("1Gi").await;
    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("2Gi".to_string())
    })
    .await;
    h.reconcile_dogu("redmine").await;

    let dogu = h.dogu("redmine").await;
    assert_eq!(dogu.status.requeue_phase, EDIT_PVC);
    assert_eq!(dogu.status.resize.as_ref().unwrap().original_replicas, Some(1));

    // A fresh reconciler over the same store picks up the recorded step
    // without scaling down again or losing the replica count.
    let fresh = DoguReconciler::new(
        StepContext::store_backed(h.client.clone(), ApplyConfig::default()),
        h.recorder.clone(),
        RequeueConfig::default(),
        ResizeConfig::default(),
    );
    for _ in 0..3 {
        fresh.reconcile(NAMESPACE, "redmine").await.unwrap();
        h.bind_claim("redmine").await;
    }
    let dogu = h.dogu("redmine").await;
    assert!(dogu.status.requeue_phase.is_empty());
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 1);
}

#[tokio::test]
async fn test_failed_resize_start_is_reported_and_requeued() {
    let h = installed("1Gi").await;
    h.edit_dogu("redmine", |spec| {
        spec.resources.data_volume_size = Some("2Gi".to_string())
    })
    .await;
    h.recorder.clear().await;

    // Every attempt of the status write that starts the workflow conflicts.
    h.store.inject_conflicts(5).await;
    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(10))
    );

    let dogu = h.dogu("redmine").await;
    assert_eq!(dogu.status.requeue_time, Duration::from_secs(10));
    assert!(dogu.status.requeue_phase.is_empty());
    assert_eq!(h.deployment("redmine").await.unwrap().spec.replicas, 1);
    assert_eq!(
        h.reasons_for("Dogu").await,
        vec![reason::RESIZE_FAILED, reason::RECONCILE_FAIL]
    );

    // The next pass starts the workflow.
    assert_eq!(
        h.reconcile_dogu("redmine").await,
        Action::Requeue(Duration::from_secs(1))
    );
    assert_eq!(h.dogu("redmine").await.status.requeue_phase, EDIT_PVC);
}
