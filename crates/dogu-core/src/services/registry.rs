// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry entries stored as `DoguRegistration` objects.

use async_trait::async_trait;
use tracing::debug;

use super::DoguRegistry;
use crate::error::Result;
use crate::model::{DOGU_LABEL, Dogu, DoguRegistration, DoguRegistrationSpec, ObjectMeta};
use crate::store::Client;

/// [`DoguRegistry`] keeping one `DoguRegistration` per dogu.
pub struct StoreDoguRegistry {
    client: Client,
}

impl StoreDoguRegistry {
    /// Create a registry writing through the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DoguRegistry for StoreDoguRegistry {
    async fn register(&self, dogu: &Dogu) -> Result<()> {
        let namespace = &dogu.metadata.namespace;
        let name = &dogu.metadata.name;
        let desired = DoguRegistrationSpec {
            dogu: dogu.spec.name.clone(),
            version: dogu.spec.version.clone(),
        };

        match self.client.get_opt::<DoguRegistrationSpec>(namespace, name).await? {
            Some(existing) if existing.spec == desired => {}
            Some(existing) => {
                let mut updated = existing;
                updated.spec = desired;
                self.client.update(&updated).await?;
                debug!(dogu = %name, version = %dogu.spec.version, "Registration updated");
            }
            None => {
                let registration = DoguRegistration::new(
                    ObjectMeta::new(namespace, name).with_label(DOGU_LABEL, name),
                    desired,
                );
                self.client.create(&registration).await?;
                debug!(dogu = %name, version = %dogu.spec.version, "Dogu registered");
            }
        }
        Ok(())
    }

    async fn unregister(&self, dogu: &Dogu) -> Result<()> {
        self.client
            .delete::<DoguRegistrationSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?;
        Ok(())
    }

    async fn is_registered(&self, dogu: &Dogu, version: &str) -> Result<bool> {
        Ok(self
            .client
            .get_opt::<DoguRegistrationSpec>(&dogu.metadata.namespace, &dogu.metadata.name)
            .await?
            .is_some_and(|r| r.spec.version == version))
    }
}
