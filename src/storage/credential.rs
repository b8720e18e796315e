//! Credentials for the remote blob backend.
//!
//! Either a shared account key parsed from a connection string, or the
//! managed identity of the host. Identity tokens are acquired and refreshed
//! by the object store client.

use crate::storage::{StorageError, StorageResult};
use std::fmt;

const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone)]
pub enum StorageCredential {
    SharedKey {
        account: String,
        key: String,
        blob_endpoint: Option<String>,
    },
    Identity {
        account: String,
        /// Replaces the instance metadata token endpoint.
        msi_endpoint: Option<String>,
    },
}

impl fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredential")
            .field("kind", &self.kind())
            .field("account", &self.account())
            .finish()
    }
}

impl StorageCredential {
    pub fn identity(account: impl Into<String>, msi_endpoint: Option<String>) -> Self {
        StorageCredential::Identity {
            account: account.into(),
            msi_endpoint,
        }
    }

    /// Parse `Key=Value;...` connection strings, including
    /// `UseDevelopmentStorage=true`.
    pub fn from_connection_string(conn: &str) -> StorageResult<Self> {
        let mut account = None;
        let mut key = None;
        let mut blob_endpoint = None;
        let mut protocol = None;
        let mut suffix = None;

        for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                StorageError::Config("connection string segment without `=`".into())
            })?;
            match name.to_ascii_lowercase().as_str() {
                "accountname" => account = Some(value.to_string()),
                "accountkey" => key = Some(value.to_string()),
                "blobendpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "defaultendpointsprotocol" => protocol = Some(value.to_string()),
                "endpointsuffix" => suffix = Some(value.to_string()),
                "usedevelopmentstorage" if value.eq_ignore_ascii_case("true") => {
                    return Ok(StorageCredential::SharedKey {
                        account: DEV_ACCOUNT.to_string(),
                        key: DEV_KEY.to_string(),
                        blob_endpoint: Some(DEV_BLOB_ENDPOINT.to_string()),
                    });
                }
                _ => {}
            }
        }

        let account = account
            .ok_or_else(|| StorageError::Config("connection string lacks AccountName".into()))?;
        let key =
            key.ok_or_else(|| StorageError::Config("connection string lacks AccountKey".into()))?;

        let blob_endpoint = blob_endpoint.or_else(|| {
            suffix.map(|suffix| {
                format!(
                    "{}://{}.blob.{}",
                    protocol.as_deref().unwrap_or("https"),
                    account,
                    suffix
                )
            })
        });

        Ok(StorageCredential::SharedKey {
            account,
            key,
            blob_endpoint,
        })
    }

    pub fn account(&self) -> &str {
        match self {
            StorageCredential::SharedKey { account, .. } => account,
            StorageCredential::Identity { account, .. } => account,
        }
    }

    pub fn blob_endpoint(&self) -> Option<&str> {
        match self {
            StorageCredential::SharedKey { blob_endpoint, .. } => blob_endpoint.as_deref(),
            StorageCredential::Identity { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageCredential::SharedKey { .. } => "shared_key",
            StorageCredential::Identity { .. } => "identity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shared_key_connection_string() {
        let cred = StorageCredential::from_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=lectures;AccountKey=abc+/==;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        match cred {
            StorageCredential::SharedKey {
                account,
                key,
                blob_endpoint,
            } => {
                assert_eq!(account, "lectures");
                assert_eq!(key, "abc+/==");
                assert_eq!(
                    blob_endpoint.as_deref(),
                    Some("https://lectures.blob.core.windows.net")
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn explicit_blob_endpoint_wins() {
        let cred = StorageCredential::from_connection_string(
            "AccountName=a;AccountKey=k;BlobEndpoint=http://localhost:10000/a/",
        )
        .unwrap();
        assert_eq!(cred.blob_endpoint(), Some("http://localhost:10000/a"));
    }

    #[test]
    fn development_storage_shortcut() {
        let cred = StorageCredential::from_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(cred.account(), DEV_ACCOUNT);
        assert_eq!(cred.blob_endpoint(), Some(DEV_BLOB_ENDPOINT));
    }

    #[test]
    fn identity_has_no_endpoint_of_its_own() {
        let cred = StorageCredential::identity("lectures", Some("http://127.0.0.1:9/token".into()));
        assert_eq!(cred.kind(), "identity");
        assert_eq!(cred.account(), "lectures");
        assert_eq!(cred.blob_endpoint(), None);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = StorageCredential::from_connection_string("AccountName=a").unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
