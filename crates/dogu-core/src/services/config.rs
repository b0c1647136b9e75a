// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration records stored as `ConfigMap` objects.

use async_trait::async_trait;
use tracing::debug;

use super::{ConfigKind, ConfigRepository};
use crate::error::{Error, Result};
use crate::model::{ConfigMap, ConfigMapSpec, DOGU_LABEL, Dogu, ObjectMeta};
use crate::store::Client;

/// [`ConfigRepository`] keeping one `ConfigMap` per dogu and [`ConfigKind`].
pub struct StoreConfigRepository {
    client: Client,
}

impl StoreConfigRepository {
    /// Create a repository writing through the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigRepository for StoreConfigRepository {
    async fn ensure(&self, dogu: &Dogu, kind: ConfigKind) -> Result<()> {
        let name = kind.record_name(&dogu.metadata.name);
        let record = ConfigMap::new(
            ObjectMeta::new(&dogu.metadata.namespace, &name)
                .with_label(DOGU_LABEL, &dogu.metadata.name),
            ConfigMapSpec::default(),
        );
        match self.client.create(&record).await {
            Ok(_) => {
                debug!(dogu = %dogu.metadata.name, record = %name, "Config record created");
                Ok(())
            }
            Err(Error::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, dogu: &Dogu, kind: ConfigKind) -> Result<()> {
        let name = kind.record_name(&dogu.metadata.name);
        if self
            .client
            .delete::<ConfigMapSpec>(&dogu.metadata.namespace, &name)
            .await?
        {
            debug!(dogu = %dogu.metadata.name, record = %name, "Config record deleted");
        }
        Ok(())
    }
}
