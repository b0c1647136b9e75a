// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the SQLite object store, driven through the typed
//! client.

use std::sync::Arc;
use std::time::Duration;

use dogu_core::model::{
    DOGU_FINALIZER, DOGU_LABEL, Dogu, DoguPhase, DoguSpec, LabelSelector, ObjectMeta,
};
use dogu_core::store::{ObjectStore, RetryPolicy, WatchEventKind};
use dogu_core::{Client, Error};
use dogu_operator::SqliteObjectStore;
use tempfile::TempDir;

fn dogu(name: &str) -> Dogu {
    Dogu::new(
        ObjectMeta::new("ecosystem", name).with_label(DOGU_LABEL, name),
        DoguSpec::new(format!("official/{name}"), "1.0.0-1"),
    )
}

async fn open(dir: &TempDir) -> (SqliteObjectStore, Client) {
    let store = SqliteObjectStore::from_path(dir.path().join("nested/operator.db"))
        .await
        .unwrap();
    let client = Client::new(Arc::new(store.clone()));
    (store, client)
}

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_from_path_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;

    client.create(&dogu("ldap")).await.unwrap();

    assert!(dir.path().join("nested/operator.db").exists());
}

#[tokio::test]
async fn test_create_get_and_list() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;

    let created = client.create(&dogu("ldap")).await.unwrap();
    client.create(&dogu("cas")).await.unwrap();

    let loaded = client.get::<DoguSpec>("ecosystem", "ldap").await.unwrap();
    assert_eq!(loaded, created);

    let all = client
        .list::<DoguSpec>("ecosystem", &LabelSelector::everything())
        .await
        .unwrap();
    let names: Vec<_> = all.iter().map(|d| d.metadata.name.as_str()).collect();
    assert_eq!(names, vec!["cas", "ldap"]);

    let err = client.create(&dogu("ldap")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[tokio::test]
async fn test_missing_object() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;

    assert!(client.get_opt::<DoguSpec>("ecosystem", "nope").await.unwrap().is_none());
    assert!(!client.delete::<DoguSpec>("ecosystem", "nope").await.unwrap());
}

// ============================================================================
// Optimistic concurrency
// ============================================================================

#[tokio::test]
async fn test_stale_write_conflicts() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;
    let created = client.create(&dogu("ldap")).await.unwrap();

    let mut first = created.clone();
    first.status.phase = DoguPhase::Installing;
    let written = client.update_status(&first).await.unwrap();
    assert!(written.metadata.resource_version > created.metadata.resource_version);

    let mut stale = created;
    stale.status.phase = DoguPhase::Installed;
    assert!(client.update_status(&stale).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_replace_of_deleted_object_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;
    let created = client.create(&dogu("ldap")).await.unwrap();
    client.delete::<DoguSpec>("ecosystem", "ldap").await.unwrap();

    let err = client.update_status(&created).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_finalizer_keeps_object_until_released() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;
    let mut ldap = dogu("ldap");
    ldap.metadata.finalizers.push(DOGU_FINALIZER.to_string());
    client.create(&ldap).await.unwrap();

    client.delete::<DoguSpec>("ecosystem", "ldap").await.unwrap();
    let deleting = client.get::<DoguSpec>("ecosystem", "ldap").await.unwrap();
    assert!(deleting.metadata.is_deleting());

    client
        .update_with_retry(&deleting, |d| d.metadata.finalizers.clear())
        .await
        .unwrap();
    assert!(client.get_opt::<DoguSpec>("ecosystem", "ldap").await.unwrap().is_none());
}

// ============================================================================
// Watch and durability
// ============================================================================

#[tokio::test]
async fn test_watch_reports_writes() {
    let dir = TempDir::new().unwrap();
    let (store, client) = open(&dir).await;
    let mut watch = store.watch();

    let created = client.create(&dogu("ldap")).await.unwrap();
    client
        .update_status_with_retry(&created, |s| s.phase = DoguPhase::Installing)
        .await
        .unwrap();
    client.delete::<DoguSpec>("ecosystem", "ldap").await.unwrap();

    let kinds: Vec<_> = (0..3).map(|_| watch.try_recv().unwrap().kind).collect();
    assert_eq!(
        kinds,
        vec![
            WatchEventKind::Created,
            WatchEventKind::StatusUpdated,
            WatchEventKind::Deleted,
        ]
    );
}

#[tokio::test]
async fn test_objects_and_versions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let last_version = {
        let (store, client) = open(&dir).await;
        let created = client.create(&dogu("ldap")).await.unwrap();
        let updated = client
            .update_status_with_retry(&created, |s| s.phase = DoguPhase::Installed)
            .await
            .unwrap();
        client.create(&dogu("cas")).await.unwrap();
        client.delete::<DoguSpec>("ecosystem", "cas").await.unwrap();
        store.pool().close().await;
        updated.metadata.resource_version
    };

    let (_, client) = open(&dir).await;
    let ldap = client.get::<DoguSpec>("ecosystem", "ldap").await.unwrap();
    assert_eq!(ldap.status.phase, DoguPhase::Installed);
    assert_eq!(ldap.metadata.resource_version, last_version);

    // Versions keep counting from where they stopped, deleted objects included.
    let recreated = client.create(&dogu("cas")).await.unwrap();
    assert!(recreated.metadata.resource_version > last_version + 1);
}

#[tokio::test]
async fn test_concurrent_writers_serialize() {
    let dir = TempDir::new().unwrap();
    let (_, client) = open(&dir).await;
    // Every round lets at least one writer through.
    let client = client.with_retry_policy(RetryPolicy {
        max_attempts: 16,
        backoff: Duration::from_millis(2),
    });
    let created = client.create(&dogu("ldap")).await.unwrap();

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let created = created.clone();
            tokio::spawn(async move {
                client
                    .update_with_retry(&created, move |d| {
                        d.metadata.labels.insert(format!("writer-{i}"), "yes".to_string());
                    })
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let ldap = client.get::<DoguSpec>("ecosystem", "ldap").await.unwrap();
    assert_eq!(ldap.metadata.labels.len(), 9);
}
