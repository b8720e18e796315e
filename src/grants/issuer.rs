//! GrantIssuer signs blob URLs with whichever credential the remote backend
//! was configured with.
//!
//! The strategy is chosen once when the backend is built. Shared-key signing is
//! local. Delegated signing needs a user delegation key from the provider; the
//! key is cached and re-fetched only when it no longer covers the requested
//! window.

use crate::{
    clock::Clock,
    grants::sas::{
        DelegationFields, SasError, SasPermissions, SasToken, UserDelegationKey,
        canonical_resource,
    },
    models::grant::GrantPermission,
    storage::{Grant, StorageError},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Lifetime requested for a fresh delegation key, unless a token needs longer.
const DELEGATION_KEY_LIFETIME: Duration = Duration::hours(6);
/// Longest delegation key the service hands out.
const DELEGATION_KEY_MAX_LIFETIME: Duration = Duration::days(7);
/// Extra validity past the token expiry so a cached key is not cut too close.
const DELEGATION_KEY_MARGIN: Duration = Duration::minutes(5);
/// `st` is back-dated by this much so a verifier whose clock runs slightly
/// behind still accepts a fresh token. `se` is unaffected.
const CLOCK_SKEW: Duration = Duration::minutes(5);

/// Source of user delegation keys (the storage provider, authenticated with
/// an identity).
#[async_trait]
pub trait DelegationKeyProvider: Send + Sync {
    async fn user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey, StorageError>;
}

pub enum SigningStrategy {
    /// Sign with the account key held by the process.
    SharedKey { account_key: String },
    /// Sign with a delegation key obtained through an identity.
    Delegated {
        provider: Arc<dyn DelegationKeyProvider>,
        cached: Mutex<Option<UserDelegationKey>>,
    },
}

impl SigningStrategy {
    pub fn shared_key(account_key: impl Into<String>) -> Self {
        SigningStrategy::SharedKey {
            account_key: account_key.into(),
        }
    }

    pub fn delegated(provider: Arc<dyn DelegationKeyProvider>) -> Self {
        SigningStrategy::Delegated {
            provider,
            cached: Mutex::new(None),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SigningStrategy::SharedKey { .. } => "shared_key",
            SigningStrategy::Delegated { .. } => "delegated",
        }
    }
}

#[derive(Debug, Error)]
enum SigningError {
    #[error(transparent)]
    Sas(#[from] SasError),
    #[error("delegation key unavailable: {0}")]
    Delegation(#[from] StorageError),
}

pub struct GrantIssuer {
    account: String,
    /// Blob endpoint without trailing slash, e.g. `https://acct.blob.core.windows.net`.
    endpoint: String,
    strategy: SigningStrategy,
    clock: Arc<dyn Clock>,
}

impl GrantIssuer {
    pub fn new(
        account: impl Into<String>,
        endpoint: impl Into<String>,
        strategy: SigningStrategy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            account: account.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            strategy,
            clock,
        }
    }

    /// Unsigned URL of an object.
    pub fn blob_url(&self, container: &str, object_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            container,
            urlencoding::encode(object_name)
        )
    }

    /// Issue a grant valid for `[now - 5min, now + ttl]`.
    ///
    /// Never fails: a signing error is logged and the plain object URL is
    /// returned instead.
    pub async fn grant(
        &self,
        container: &str,
        object_name: &str,
        ttl: Duration,
        permission: GrantPermission,
    ) -> Grant {
        let url = self.blob_url(container, object_name);
        match self.sign(container, object_name, ttl, permission).await {
            Ok(token) => {
                debug!(
                    container = %container,
                    object = %object_name,
                    permission = %permission,
                    strategy = self.strategy.name(),
                    expires_at = %token.expiry,
                    "issued access grant"
                );
                Grant::Signed {
                    url: format!("{}?{}", url, token.to_query()),
                    expires_at: token.expiry,
                }
            }
            Err(err) => {
                warn!(
                    container = %container,
                    object = %object_name,
                    strategy = self.strategy.name(),
                    error = %err,
                    "signing failed, falling back to plain object URL"
                );
                Grant::Plain { url }
            }
        }
    }

    async fn sign(
        &self,
        container: &str,
        object_name: &str,
        ttl: Duration,
        permission: GrantPermission,
    ) -> Result<SasToken, SigningError> {
        let now = self.clock.now();
        let start = now - CLOCK_SKEW;
        let expiry = now + ttl;
        let permissions = SasPermissions::for_grant(permission);
        let resource = canonical_resource(&self.account, container, object_name);

        match &self.strategy {
            SigningStrategy::SharedKey { account_key } => {
                Ok(SasToken::new(permissions, start, expiry, self.protocol(), None)
                    .sign(account_key, &resource)?)
            }
            SigningStrategy::Delegated { provider, cached } => {
                let key = self.delegation_key(provider, cached, start, expiry).await?;
                Ok(SasToken::new(
                    permissions,
                    start,
                    expiry,
                    self.protocol(),
                    Some(DelegationFields::from(&key)),
                )
                .sign(&key.value, &resource)?)
            }
        }
    }

    /// Cached delegation key covering `[now, until]`, fetching a new one if the
    /// cache is empty or too short. The lock is held across the fetch so
    /// concurrent callers share one round-trip.
    async fn delegation_key(
        &self,
        provider: &Arc<dyn DelegationKeyProvider>,
        cached: &Mutex<Option<UserDelegationKey>>,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<UserDelegationKey, StorageError> {
        let mut slot = cached.lock().await;
        if let Some(key) = slot.as_ref() {
            if key.covers(now, until) {
                return Ok(key.clone());
            }
        }

        let wanted = (until + DELEGATION_KEY_MARGIN).max(now + DELEGATION_KEY_LIFETIME);
        let expiry = wanted.min(now + DELEGATION_KEY_MAX_LIFETIME);
        let key = provider.user_delegation_key(now, expiry).await?;
        debug!(expires_at = %key.signed_expiry, "refreshed user delegation key");
        *slot = Some(key.clone());
        Ok(key)
    }

    fn protocol(&self) -> &'static str {
        if self.endpoint.starts_with("http://") {
            "https,http"
        } else {
            "https"
        }
    }
}
