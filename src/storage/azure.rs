//! Remote blob backend.
//!
//! Object reads and writes go through `object_store`'s Azure client, which
//! also owns authentication (account key or managed identity). Container
//! creation and delegation keys go through [`ManagementClient`].

use crate::{
    clock::Clock,
    grants::{GrantIssuer, SigningStrategy},
    models::grant::GrantPermission,
    storage::{
        ByteStream, Grant, ManagementAuth, ManagementClient, Storage, StorageBackend,
        StorageCredential, StorageError, StorageResult, StoredObject,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use futures::StreamExt;
use object_store::{
    Attribute, Attributes, Error as ObjectStoreError, ObjectStore, ObjectStoreExt, PutOptions,
    PutPayload, RetryConfig,
    azure::{MicrosoftAzure, MicrosoftAzureBuilder},
    path::Path,
};
use std::{io, sync::Arc, time::Instant};
use tokio::sync::OnceCell;
use tracing::{error, info};

pub struct AzureBlobStorage {
    store: MicrosoftAzure,
    management: Arc<ManagementClient>,
    container: String,
    issuer: GrantIssuer,
    /// Set once the container is known to exist.
    container_ready: OnceCell<()>,
}

impl AzureBlobStorage {
    /// `endpoint` is the account's blob endpoint, e.g.
    /// `https://acct.blob.core.windows.net`. The signing strategy follows the
    /// credential: the account key signs directly, an identity signs through
    /// delegation keys.
    pub fn new(
        credential: StorageCredential,
        endpoint: impl Into<String>,
        container: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let container = container.into();

        let mut builder = match &credential {
            StorageCredential::SharedKey { account, key, .. } => MicrosoftAzureBuilder::new()
                .with_account(account)
                .with_access_key(key),
            StorageCredential::Identity {
                account,
                msi_endpoint,
            } => {
                let builder = MicrosoftAzureBuilder::from_env().with_account(account);
                match msi_endpoint {
                    Some(url) => builder.with_msi_endpoint(url),
                    None => builder,
                }
            }
        };
        builder = builder
            .with_container_name(&container)
            .with_endpoint(endpoint.clone())
            .with_allow_http(endpoint.starts_with("http://"))
            .with_retry(RetryConfig {
                max_retries: 2,
                retry_timeout: std::time::Duration::from_secs(30),
                ..Default::default()
            });
        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("blob store: {}", e)))?;

        let auth = match &credential {
            StorageCredential::SharedKey { account, key, .. } => ManagementAuth::AccountKey {
                account: account.clone(),
                key: key.clone(),
            },
            StorageCredential::Identity { .. } => {
                ManagementAuth::Identity(store.credentials().clone())
            }
        };
        let management = Arc::new(ManagementClient::new(endpoint.clone(), auth)?);

        let strategy = match &credential {
            StorageCredential::SharedKey { key, .. } => SigningStrategy::shared_key(key.clone()),
            StorageCredential::Identity { .. } => SigningStrategy::delegated(management.clone()),
        };
        let issuer = GrantIssuer::new(credential.account(), endpoint, strategy, clock);

        Ok(Self {
            store,
            management,
            container,
            issuer,
            container_ready: OnceCell::new(),
        })
    }

    /// Create the container on first use. Concurrent callers wait on the same
    /// attempt; a failed attempt leaves the cell empty so the next write
    /// retries.
    async fn ensure_container(&self) -> StorageResult<()> {
        self.container_ready
            .get_or_try_init(|| async {
                self.management.create_container(&self.container).await?;
                info!(container = %self.container, "container ready");
                Ok::<(), StorageError>(())
            })
            .await
            .map(|_| ())
    }

    /// The store is bound to one container.
    fn location(&self, container: &str, object_name: &str) -> StorageResult<Path> {
        if container != self.container {
            return Err(StorageError::NotFound(format!("{}/{}", container, object_name)));
        }
        Ok(Path::from(object_name))
    }
}

fn map_store_error(operation: &str, object_name: &str, err: ObjectStoreError) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(object_name.to_string()),
        other => {
            error!(operation = operation, object = %object_name, error = %other, "blob operation failed");
            StorageError::Unavailable(format!("{} `{}` failed", operation, object_name))
        }
    }
}

#[async_trait]
impl Storage for AzureBlobStorage {
    async fn put(
        &self,
        object_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        self.ensure_container().await?;

        let size = data.len();
        let start = Instant::now();
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(object_name), PutPayload::from(data), options)
            .await
            .map_err(|e| map_store_error("put", object_name, e))?;

        info!(
            container = %self.container,
            object = %object_name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "blob upload complete"
        );

        Ok(StoredObject {
            container: self.container.clone(),
            object_name: object_name.to_string(),
            url: Some(self.issuer.blob_url(&self.container, object_name)),
        })
    }

    async fn get(&self, container: &str, object_name: &str) -> StorageResult<ByteStream> {
        let location = self.location(container, object_name)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error("get", object_name, e))?;
        let stream = result.into_stream().map(|chunk| chunk.map_err(io::Error::other));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, container: &str, object_name: &str) -> StorageResult<()> {
        let location = self.location(container, object_name)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_error("delete", object_name, e)),
        }
    }

    async fn grant(
        &self,
        container: &str,
        object_name: &str,
        ttl: Duration,
        permission: GrantPermission,
    ) -> Grant {
        self.issuer
            .grant(container, object_name, ttl, permission)
            .await
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Remote
    }

    fn container(&self) -> &str {
        &self.container
    }
}
