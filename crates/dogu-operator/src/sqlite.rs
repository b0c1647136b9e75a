// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed object store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::debug;

use dogu_core::model::ObjectKey;
use dogu_core::store::{
    ObjectStore, RawObject, UpdateScope, WATCH_CHANNEL_CAPACITY, WatchEvent, WatchEventKind,
};

use crate::error::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Object store persisting objects as JSON rows.
///
/// Resource versions come from a single counter row, so they increase
/// across all objects and survive restarts. Watch events are only published
/// to subscribers of this process.
#[derive(Clone)]
pub struct SqliteObjectStore {
    pool: SqlitePool,
    events: broadcast::Sender<WatchEvent>,
}

impl SqliteObjectStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self { pool, events }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteObjectStore::from_path(".data/dogu-operator.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        MIGRATOR.run(&pool).await?;

        debug!(path = ?path, "SQLite object store ready");
        Ok(Self::new(pool))
    }

    /// Create a store backed by a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: opens its own database, and closing
        // the only one drops it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn publish(&self, key: &ObjectKey, kind: WatchEventKind) {
        let _ = self.events.send(WatchEvent {
            key: key.clone(),
            kind,
        });
    }

    async fn exists(&self, key: &ObjectKey) -> dogu_core::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM objects WHERE kind = ? AND namespace = ? AND name = ?")
            .bind(&key.kind)
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("exists"))?;
        Ok(row.is_some())
    }
}

fn db(operation: &'static str) -> impl FnOnce(sqlx::Error) -> dogu_core::Error {
    move |e| dogu_core::Error::store(operation, e)
}

fn raw_object(key: ObjectKey, version: i64, body: &str) -> dogu_core::Result<RawObject> {
    Ok(RawObject {
        key,
        resource_version: version as u64,
        body: serde_json::from_str(body)?,
    })
}

/// Take the next resource version. Runs first in every write transaction so
/// the write lock is acquired before anything is read.
async fn next_version(conn: &mut sqlx::SqliteConnection) -> dogu_core::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE object_versions SET last_version = last_version + 1 WHERE id = 1 RETURNING last_version",
    )
    .fetch_one(conn)
    .await
    .map_err(db("next_version"))
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn get(&self, key: &ObjectKey) -> dogu_core::Result<Option<RawObject>> {
        let row = sqlx::query(
            r#"
            SELECT resource_version, body
            FROM objects
            WHERE kind = ? AND namespace = ? AND name = ?
            "#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("get"))?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("resource_version").map_err(db("get"))?;
                let body: String = row.try_get("body").map_err(db("get"))?;
                raw_object(key.clone(), version, &body).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list(&self, kind: &str, namespace: &str) -> dogu_core::Result<Vec<RawObject>> {
        let rows = sqlx::query(
            r#"
            SELECT name, resource_version, body
            FROM objects
            WHERE kind = ? AND namespace = ?
            ORDER BY name
            "#,
        )
        .bind(kind)
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(db("list"))?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name").map_err(db("list"))?;
                let version: i64 = row.try_get("resource_version").map_err(db("list"))?;
                let body: String = row.try_get("body").map_err(db("list"))?;
                raw_object(ObjectKey::new(kind, namespace, name), version, &body)
            })
            .collect()
    }

    async fn create(&self, key: &ObjectKey, body: Value) -> dogu_core::Result<u64> {
        let body = serde_json::to_string(&body)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(db("create"))?;
        let version = next_version(&mut tx).await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO objects (kind, namespace, name, resource_version, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(version)
        .bind(&body)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(dogu_core::Error::AlreadyExists {
                    kind: key.kind.clone(),
                    name: key.name.clone(),
                });
            }
            Err(e) => return Err(db("create")(e)),
        }
        tx.commit().await.map_err(db("create"))?;

        self.publish(key, WatchEventKind::Created);
        Ok(version as u64)
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        body: Value,
        scope: UpdateScope,
    ) -> dogu_core::Result<u64> {
        let body = serde_json::to_string(&body)?;

        let mut tx = self.pool.begin().await.map_err(db("replace"))?;
        let version = next_version(&mut tx).await?;
        let updated = sqlx::query(
            r#"
            UPDATE objects
            SET resource_version = ?, body = ?, updated_at = ?
            WHERE kind = ? AND namespace = ? AND name = ? AND resource_version = ?
            "#,
        )
        .bind(version)
        .bind(&body)
        .bind(Utc::now())
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(db("replace"))?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db("replace"))?;
            return Err(if self.exists(key).await? {
                dogu_core::Error::conflict(&key.kind, &key.name)
            } else {
                dogu_core::Error::not_found(&key.kind, &key.name)
            });
        }
        tx.commit().await.map_err(db("replace"))?;

        self.publish(key, scope.into());
        Ok(version as u64)
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        expected_version: Option<u64>,
    ) -> dogu_core::Result<bool> {
        let expected = expected_version.map(|v| v as i64);
        let deleted = sqlx::query(
            r#"
            DELETE FROM objects
            WHERE kind = ? AND namespace = ? AND name = ?
              AND (? IS NULL OR resource_version = ?)
            "#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(expected)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(db("delete"))?;

        let removed = deleted.rows_affected() > 0;
        if removed {
            self.publish(key, WatchEventKind::Deleted);
        } else if expected.is_some() && self.exists(key).await? {
            return Err(dogu_core::Error::conflict(&key.kind, &key.name));
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
