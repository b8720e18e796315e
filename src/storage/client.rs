//! Service-level calls the object store client does not cover: creating the
//! container and fetching user delegation keys.
//!
//! With the account key, requests carry a short-lived account SAS. With an
//! identity, they carry a bearer token from the object store's credential
//! provider, so both share one token cache.

use crate::{
    grants::{
        DelegationKeyProvider,
        sas::{UserDelegationKey, container_create_query, format_time, parse_time},
    },
    storage::{StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use object_store::{
    CredentialProvider,
    azure::{AzureCredential, AzureCredentialProvider},
};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, error};

/// REST API version sent as `x-ms-version`.
const API_VERSION: &str = "2021-08-06";
/// Validity of the account SAS minted for one management call.
const MANAGEMENT_SAS_TTL: Duration = Duration::minutes(15);
const CLOCK_SKEW: Duration = Duration::minutes(5);

pub enum ManagementAuth {
    AccountKey { account: String, key: String },
    Identity(AzureCredentialProvider),
}

pub struct ManagementClient {
    http: Client,
    /// Without trailing slash.
    endpoint: String,
    auth: ManagementAuth,
}

impl ManagementClient {
    pub fn new(endpoint: impl Into<String>, auth: ManagementAuth) -> StorageResult<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Create `container`. An existing container counts as success.
    pub async fn create_container(&self, container: &str) -> StorageResult<()> {
        let response = self
            .send(
                Method::PUT,
                &format!("/{}", container),
                &[("restype", "container")],
                None,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                debug!(container = %container, "container created");
                Ok(())
            }
            StatusCode::CONFLICT
                if error_code(&response).as_deref() == Some("ContainerAlreadyExists") =>
            {
                debug!(container = %container, "container already exists");
                Ok(())
            }
            _ => Err(failure("create container", &response)),
        }
    }

    /// Requires an identity credential.
    pub async fn get_user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> StorageResult<UserDelegationKey> {
        if !matches!(self.auth, ManagementAuth::Identity(_)) {
            return Err(StorageError::Config(
                "user delegation keys require an identity credential".into(),
            ));
        }

        let body = format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                "<KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>"
            ),
            format_time(start),
            format_time(expiry)
        );
        let response = self
            .send(
                Method::POST,
                "/",
                &[("restype", "service"), ("comp", "userdelegationkey")],
                Some(Bytes::from(body)),
            )
            .await?;

        if !response.status().is_success() {
            return Err(failure("get user delegation key", &response));
        }
        let xml = response
            .text()
            .await
            .map_err(|e| StorageError::Unavailable(format!("delegation key body: {}", e)))?;
        parse_delegation_key(&xml)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> StorageResult<Response> {
        let mut query: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();

        let now = Utc::now();
        let mut bearer = None;
        match &self.auth {
            ManagementAuth::AccountKey { account, key } => {
                let sas = container_create_query(
                    account,
                    key,
                    now - CLOCK_SKEW,
                    now + MANAGEMENT_SAS_TTL,
                    self.protocol(),
                )
                .map_err(|e| StorageError::Config(format!("account key: {}", e)))?;
                query.push(sas);
            }
            ManagementAuth::Identity(provider) => {
                bearer = Some(bearer_token(provider).await?);
            }
        }

        let url = format!("{}{}?{}", self.endpoint, path, query.join("&"));
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("x-ms-date", now.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            .header("x-ms-version", API_VERSION);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request = match body {
            Some(body) => request
                .header("content-type", "application/xml")
                .header("content-length", body.len())
                .body(body),
            None => request.header("content-length", 0),
        };

        request.send().await.map_err(|e| {
            error!(method = %method, path = %path, error = %e, "storage management request failed");
            StorageError::Unavailable(format!("{} {}: request failed", method, path))
        })
    }

    fn protocol(&self) -> &'static str {
        if self.endpoint.starts_with("http://") {
            "https,http"
        } else {
            "https"
        }
    }
}

#[async_trait]
impl DelegationKeyProvider for ManagementClient {
    async fn user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey, StorageError> {
        self.get_user_delegation_key(start, expiry).await
    }
}

async fn bearer_token(provider: &AzureCredentialProvider) -> StorageResult<String> {
    let credential = provider.get_credential().await.map_err(|e| {
        error!(error = %e, "failed to acquire storage access token");
        StorageError::Unavailable("storage access token unavailable".into())
    })?;
    match credential.as_ref() {
        AzureCredential::BearerToken(token) => Ok(token.clone()),
        _ => Err(StorageError::Config(
            "identity credential did not yield a bearer token".into(),
        )),
    }
}

fn error_code(response: &Response) -> Option<String> {
    response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Status and service error code only; response bodies may echo request
/// details and are not carried into errors.
fn failure(operation: &str, response: &Response) -> StorageError {
    let code = error_code(response).unwrap_or_default();
    error!(
        operation = operation,
        status = %response.status(),
        code = %code,
        "blob service rejected request"
    );
    StorageError::Unavailable(format!("{} returned {} {}", operation, response.status(), code))
}

fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

fn parse_delegation_key(xml: &str) -> StorageResult<UserDelegationKey> {
    let field = |tag: &str| {
        xml_text(xml, tag).ok_or_else(|| {
            StorageError::Unavailable(format!("delegation key response lacks <{}>", tag))
        })
    };
    let time = |tag: &str| {
        field(tag).and_then(|v| {
            parse_time(&v)
                .map_err(|_| StorageError::Unavailable(format!("bad <{}> timestamp", tag)))
        })
    };

    Ok(UserDelegationKey {
        signed_oid: field("SignedOid")?,
        signed_tid: field("SignedTid")?,
        signed_start: time("SignedStart")?,
        signed_expiry: time("SignedExpiry")?,
        signed_service: field("SignedService")?,
        signed_version: field("SignedVersion")?,
        value: field("Value")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use object_store::StaticCredentialProvider;
    use std::sync::Arc;

    const KEY: &str = "a2V5LWZvci1ibG9iLWNsaWVudC10ZXN0cw==";

    fn keyed(endpoint: String) -> ManagementClient {
        ManagementClient::new(
            endpoint,
            ManagementAuth::AccountKey {
                account: "acct".into(),
                key: KEY.into(),
            },
        )
        .unwrap()
    }

    fn identity(endpoint: String) -> ManagementClient {
        let provider: AzureCredentialProvider = Arc::new(StaticCredentialProvider::new(
            AzureCredential::BearerToken("bearer-123".into()),
        ));
        ManagementClient::new(endpoint, ManagementAuth::Identity(provider)).unwrap()
    }

    #[tokio::test]
    async fn container_creation_carries_account_sas() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/acct/videos")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("restype".into(), "container".into()),
                Matcher::UrlEncoded("srt".into(), "c".into()),
                Matcher::UrlEncoded("sp".into(), "c".into()),
                Matcher::UrlEncoded("spr".into(), "https,http".into()),
                Matcher::Regex("sig=.+".into()),
            ]))
            .match_header("x-ms-version", API_VERSION)
            .with_status(201)
            .create_async()
            .await;

        keyed(format!("{}/acct", server.url()))
            .create_container("videos")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn existing_container_is_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/videos")
            .match_query(Matcher::UrlEncoded("restype".into(), "container".into()))
            .with_status(409)
            .with_header("x-ms-error-code", "ContainerAlreadyExists")
            .create_async()
            .await;

        keyed(server.url()).create_container("videos").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn container_being_deleted_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/videos")
            .match_query(Matcher::Any)
            .with_status(409)
            .with_header("x-ms-error-code", "ContainerBeingDeleted")
            .create_async()
            .await;

        assert!(matches!(
            keyed(server.url()).create_container("videos").await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn identity_calls_use_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/videos")
            .match_query(Matcher::UrlEncoded("restype".into(), "container".into()))
            .match_header("authorization", "Bearer bearer-123")
            .with_status(201)
            .create_async()
            .await;

        identity(server.url())
            .create_container("videos")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delegation_key_uses_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("restype".into(), "service".into()),
                Matcher::UrlEncoded("comp".into(), "userdelegationkey".into()),
            ]))
            .match_header("authorization", "Bearer bearer-123")
            .match_body(Matcher::Regex("<Start>2025-01-01T00:00:00Z</Start>".into()))
            .with_status(200)
            .with_body(concat!(
                r#"<?xml version="1.0" encoding="utf-8"?><UserDelegationKey>"#,
                "<SignedOid>oid</SignedOid><SignedTid>tid</SignedTid>",
                "<SignedStart>2025-01-01T00:00:00Z</SignedStart>",
                "<SignedExpiry>2025-01-01T06:00:00Z</SignedExpiry>",
                "<SignedService>b</SignedService><SignedVersion>2021-08-06</SignedVersion>",
                "<Value>ZGVsZWdhdGVk</Value></UserDelegationKey>"
            ))
            .create_async()
            .await;

        let start = parse_time("2025-01-01T00:00:00Z").unwrap();
        let key = identity(server.url())
            .get_user_delegation_key(start, start + Duration::hours(6))
            .await
            .unwrap();
        assert_eq!(key.signed_oid, "oid");
        assert_eq!(key.value, "ZGVsZWdhdGVk");
        assert_eq!(format_time(key.signed_expiry), "2025-01-01T06:00:00Z");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delegation_key_needs_identity() {
        let err = keyed("http://127.0.0.1:9".into())
            .user_delegation_key(Utc::now(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn incomplete_delegation_key_is_rejected() {
        let err = parse_delegation_key("<UserDelegationKey><SignedOid>o</SignedOid></UserDelegationKey>")
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
