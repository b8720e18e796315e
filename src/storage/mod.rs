//! Storage backends for video payloads.
//!
//! Two backends implement [`Storage`]: [`AzureBlobStorage`] talks to a remote
//! blob service, [`LocalStorage`] writes under a directory on disk. The backend
//! is chosen once at startup by [`create_storage`] and injected into the
//! services as `Arc<dyn Storage>`.

pub mod azure;
pub mod client;
pub mod credential;
pub mod local;

use crate::{clock::SystemClock, config::AppConfig, models::grant::GrantPermission};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use serde::Serialize;
use std::{io, pin::Pin, sync::Arc};
use thiserror::Error;

pub use azure::AzureBlobStorage;
pub use client::{ManagementAuth, ManagementClient};
pub use credential::StorageCredential;
pub use local::LocalStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not complete a read or write.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object name `{0}`")]
    InvalidObjectName(String),
    #[error("storage configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Streamed object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Remote,
    Local,
}

/// Where a `put` landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub container: String,
    pub object_name: String,
    /// Backend URL of the object. `None` for local storage, where the
    /// resolvable URL depends on the gateway address.
    pub url: Option<String>,
}

/// Outcome of a grant request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Signed, time-bounded URL.
    Signed {
        url: String,
        expires_at: DateTime<Utc>,
    },
    /// Unsigned object URL, returned when signing failed. Only usable if the
    /// container allows public reads.
    Plain { url: String },
    /// The backend has no notion of signed access (local storage); the caller
    /// resolves the URL itself and no expiry applies.
    Unbounded,
}

/// Uniform operations over one storage medium.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` as `object_name` in the backend's container.
    async fn put(
        &self,
        object_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredObject>;

    /// Stream an object's bytes.
    async fn get(&self, container: &str, object_name: &str) -> StorageResult<ByteStream>;

    /// Remove an object. Removing an object that does not exist succeeds.
    async fn delete(&self, container: &str, object_name: &str) -> StorageResult<()>;

    /// Grant `permission` on one object for `ttl`.
    async fn grant(
        &self,
        container: &str,
        object_name: &str,
        ttl: Duration,
        permission: GrantPermission,
    ) -> Grant;

    fn backend(&self) -> StorageBackend;

    /// Container new objects are written to.
    fn container(&self) -> &str;
}

/// Pick and build the backend from configuration.
///
/// A connection string selects the remote backend with its shared key; an
/// account name alone selects the remote backend with the managed identity;
/// otherwise objects go to the local storage directory.
pub async fn create_storage(cfg: &AppConfig) -> StorageResult<Arc<dyn Storage>> {
    let credential = match (&cfg.connection_string, &cfg.account_name) {
        (Some(conn), _) => Some(StorageCredential::from_connection_string(conn)?),
        (None, Some(account)) => Some(StorageCredential::identity(
            account,
            cfg.identity_endpoint.clone(),
        )),
        (None, None) => None,
    };

    match credential {
        Some(credential) => {
            let endpoint = cfg
                .blob_endpoint
                .clone()
                .or_else(|| credential.blob_endpoint().map(str::to_string))
                .unwrap_or_else(|| {
                    format!("https://{}.blob.core.windows.net", credential.account())
                });
            tracing::info!(
                account = %credential.account(),
                endpoint = %endpoint,
                container = %cfg.container,
                auth = credential.kind(),
                "using remote blob storage"
            );
            Ok(Arc::new(AzureBlobStorage::new(
                credential,
                endpoint,
                cfg.container.clone(),
                Arc::new(SystemClock),
            )?))
        }
        None => {
            tracing::info!(root = %cfg.storage_dir, "using local filesystem storage");
            let storage = LocalStorage::new(&cfg.storage_dir, cfg.container.clone()).await?;
            Ok(Arc::new(storage))
        }
    }
}
