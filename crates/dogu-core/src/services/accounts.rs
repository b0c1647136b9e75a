// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service accounts stored as `ServiceAccount` objects.

use async_trait::async_trait;
use tracing::{debug, info};

use super::ServiceAccountManager;
use crate::error::{Error, Result};
use crate::model::{
    DOGU_LABEL, Dogu, LabelSelector, ObjectMeta, ServiceAccount, ServiceAccountSpec,
};
use crate::store::Client;

/// [`ServiceAccountManager`] creating one `<dogu>-<type>` object per account
/// type listed in the dogu spec.
pub struct StoreServiceAccountManager {
    client: Client,
}

impl StoreServiceAccountManager {
    /// Create a manager writing through the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountManager for StoreServiceAccountManager {
    async fn create(&self, dogu: &Dogu) -> Result<()> {
        let consumer = &dogu.metadata.name;
        for account_type in &dogu.spec.service_accounts {
            let account = ServiceAccount::new(
                ObjectMeta::new(&dogu.metadata.namespace, format!("{consumer}-{account_type}"))
                    .with_label(DOGU_LABEL, consumer),
                ServiceAccountSpec {
                    consumer: consumer.clone(),
                    account_type: account_type.clone(),
                },
            );
            match self.client.create(&account).await {
                Ok(_) => debug!(dogu = %consumer, account_type = %account_type, "Service account created"),
                Err(Error::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn remove(&self, dogu: &Dogu) -> Result<()> {
        let namespace = &dogu.metadata.namespace;
        let accounts = self
            .client
            .list::<ServiceAccountSpec>(
                namespace,
                &LabelSelector::eq(DOGU_LABEL, &dogu.metadata.name),
            )
            .await?;
        for account in &accounts {
            self.client
                .delete::<ServiceAccountSpec>(namespace, &account.metadata.name)
                .await?;
        }
        if !accounts.is_empty() {
            info!(dogu = %dogu.metadata.name, count = accounts.len(), "Service accounts removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::DoguSpec;
    use crate::store::MemoryObjectStore;

    #[tokio::test]
    async fn test_create_and_remove_accounts() {
        let client = Client::new(Arc::new(MemoryObjectStore::new()));
        let manager = StoreServiceAccountManager::new(client.clone());
        let mut spec = DoguSpec::new("official/redmine", "5.1.3-1");
        spec.service_accounts = vec!["postgresql".to_string(), "ldap".to_string()];
        let dogu = Dogu::new(ObjectMeta::new("ecosystem", "redmine"), spec);

        manager.create(&dogu).await.unwrap();
        manager.create(&dogu).await.unwrap();
        let accounts = client
            .list::<ServiceAccountSpec>("ecosystem", &LabelSelector::everything())
            .await
            .unwrap();
        let names: Vec<_> = accounts.iter().map(|a| a.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["redmine-ldap", "redmine-postgresql"]);

        manager.remove(&dogu).await.unwrap();
        assert!(
            client
                .list::<ServiceAccountSpec>("ecosystem", &LabelSelector::everything())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
