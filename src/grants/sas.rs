//! Shared access signature tokens for single blobs.
//!
//! Two layouts are produced: the service SAS signed with the account key, and
//! the user-delegation SAS signed with a delegation key obtained from an
//! identity. Both cover exactly one blob (`sr=b`) for `[st, se]`.
//!
//! `SasToken::authorize` mirrors the check the storage service performs when a
//! token is presented, so grants can be verified without a round-trip.

use crate::models::grant::GrantPermission;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Service version the string-to-sign layouts below correspond to.
pub const SAS_VERSION: &str = "2021-08-06";

const SIGNED_RESOURCE_BLOB: &str = "b";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SasError {
    #[error("signing key is not valid base64")]
    InvalidKey,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token is not yet valid")]
    NotYetValid,
    #[error("token has expired")]
    Expired,
    #[error("token does not permit {0:?}")]
    PermissionDenied(BlobOperation),
    #[error("signature mismatch")]
    SignatureMismatch,
}

pub type SasResult<T> = Result<T, SasError>;

/// Blob operations a presented token may be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOperation {
    Read,
    Create,
    Write,
    Delete,
}

/// The `sp` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    /// Read grants may only read; write grants may create and overwrite the
    /// named blob but never delete it.
    pub fn for_grant(permission: GrantPermission) -> Self {
        match permission {
            GrantPermission::Read => Self {
                read: true,
                ..Self::default()
            },
            GrantPermission::Write => Self {
                create: true,
                write: true,
                ..Self::default()
            },
        }
    }

    pub fn parse(value: &str) -> SasResult<Self> {
        let mut perms = Self::default();
        for c in value.chars() {
            match c {
                'r' => perms.read = true,
                'c' => perms.create = true,
                'w' => perms.write = true,
                'd' => perms.delete = true,
                other => {
                    return Err(SasError::Malformed(format!(
                        "unsupported permission `{}`",
                        other
                    )));
                }
            }
        }
        Ok(perms)
    }

    pub fn allows(&self, op: BlobOperation) -> bool {
        match op {
            BlobOperation::Read => self.read,
            BlobOperation::Create => self.create,
            BlobOperation::Write => self.write,
            BlobOperation::Delete => self.delete,
        }
    }
}

impl fmt::Display for SasPermissions {
    // Canonical order required by the service.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.create {
            f.write_str("c")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.delete {
            f.write_str("d")?;
        }
        Ok(())
    }
}

/// Key material returned by the Get User Delegation Key operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDelegationKey {
    pub signed_oid: String,
    pub signed_tid: String,
    pub signed_start: DateTime<Utc>,
    pub signed_expiry: DateTime<Utc>,
    pub signed_service: String,
    pub signed_version: String,
    /// Base64 key used to sign tokens.
    pub value: String,
}

impl UserDelegationKey {
    /// True when the key can sign a token valid until `until` at time `now`.
    pub fn covers(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.signed_start <= now && until <= self.signed_expiry
    }
}

/// The delegation fields (`skoid`..`skv`) embedded in a user-delegation SAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationFields {
    pub oid: String,
    pub tid: String,
    pub start: String,
    pub expiry: String,
    pub service: String,
    pub version: String,
}

impl From<&UserDelegationKey> for DelegationFields {
    fn from(key: &UserDelegationKey) -> Self {
        Self {
            oid: key.signed_oid.clone(),
            tid: key.signed_tid.clone(),
            start: format_time(key.signed_start),
            expiry: format_time(key.signed_expiry),
            service: key.signed_service.clone(),
            version: key.signed_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    pub version: String,
    pub resource: String,
    pub permissions: SasPermissions,
    pub start: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub protocol: String,
    pub delegation: Option<DelegationFields>,
    pub signature: String,
}

impl SasToken {
    /// Unsigned blob token for `[start, expiry]`. Times are truncated to
    /// whole seconds, the precision carried on the wire.
    pub fn new(
        permissions: SasPermissions,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
        protocol: impl Into<String>,
        delegation: Option<DelegationFields>,
    ) -> Self {
        Self {
            version: SAS_VERSION.to_string(),
            resource: SIGNED_RESOURCE_BLOB.to_string(),
            permissions,
            start: truncate_secs(start),
            expiry: truncate_secs(expiry),
            protocol: protocol.into(),
            delegation,
            signature: String::new(),
        }
    }

    /// Sign with a base64-encoded key (account key or delegation key value).
    pub fn sign(mut self, key_b64: &str, canonical_resource: &str) -> SasResult<Self> {
        self.signature = hmac_b64(key_b64, &self.string_to_sign(canonical_resource))?;
        Ok(self)
    }

    /// Layout of fields fed to the HMAC. Unused optional fields are empty
    /// lines.
    pub fn string_to_sign(&self, canonical_resource: &str) -> String {
        let sp = self.permissions.to_string();
        let st = format_time(self.start);
        let se = format_time(self.expiry);
        let mut fields: Vec<&str> = vec![sp.as_str(), st.as_str(), se.as_str(), canonical_resource];
        match &self.delegation {
            Some(d) => {
                fields.extend([
                    d.oid.as_str(),
                    d.tid.as_str(),
                    d.start.as_str(),
                    d.expiry.as_str(),
                    d.service.as_str(),
                    d.version.as_str(),
                    "", // saoid
                    "", // suoid
                    "", // scid
                ]);
            }
            None => fields.push(""), // si
        }
        fields.extend([
            "", // sip
            self.protocol.as_str(),
            self.version.as_str(),
            self.resource.as_str(),
            "", // snapshot
            "", // ses
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ]);
        fields.join("\n")
    }

    /// Query string form, without the leading `?`.
    pub fn to_query(&self) -> String {
        let mut pairs = vec![
            ("sv", self.version.clone()),
            ("st", format_time(self.start)),
            ("se", format_time(self.expiry)),
            ("sr", self.resource.clone()),
            ("sp", self.permissions.to_string()),
            ("spr", self.protocol.clone()),
        ];
        if let Some(d) = &self.delegation {
            pairs.extend([
                ("skoid", d.oid.clone()),
                ("sktid", d.tid.clone()),
                ("skt", d.start.clone()),
                ("ske", d.expiry.clone()),
                ("sks", d.service.clone()),
                ("skv", d.version.clone()),
            ]);
        }
        pairs.push(("sig", self.signature.clone()));
        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Parse a token from a full URL or a bare query string.
    pub fn parse(url_or_query: &str) -> SasResult<Self> {
        let query = match url_or_query.split_once('?') {
            Some((_, q)) => q,
            None => url_or_query,
        };

        let mut fields = std::collections::HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(v)
                .map_err(|_| SasError::Malformed(format!("`{}` is not valid UTF-8", k)))?;
            fields.insert(k.to_string(), value.into_owned());
        }

        let take = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| SasError::Malformed(format!("missing `{}`", name)))
        };

        let delegation = if fields.contains_key("skoid") {
            Some(DelegationFields {
                oid: take("skoid")?,
                tid: take("sktid")?,
                start: take("skt")?,
                expiry: take("ske")?,
                service: take("sks")?,
                version: take("skv")?,
            })
        } else {
            None
        };

        Ok(Self {
            version: take("sv")?,
            resource: take("sr")?,
            permissions: SasPermissions::parse(&take("sp")?)?,
            start: parse_time(&take("st")?)?,
            expiry: parse_time(&take("se")?)?,
            protocol: take("spr")?,
            delegation,
            signature: take("sig")?,
        })
    }

    /// Check a presented token the way the storage service would: the
    /// signature must match, `at` must fall inside the window, and `op` must be
    /// in the permission set.
    pub fn authorize(
        &self,
        key_b64: &str,
        canonical_resource: &str,
        at: DateTime<Utc>,
        op: BlobOperation,
    ) -> SasResult<()> {
        let key = decode_key(key_b64)?;
        let presented = general_purpose::STANDARD
            .decode(&self.signature)
            .map_err(|_| SasError::SignatureMismatch)?;
        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SasError::InvalidKey)?;
        mac.update(self.string_to_sign(canonical_resource).as_bytes());
        mac.verify_slice(&presented)
            .map_err(|_| SasError::SignatureMismatch)?;

        if at < self.start {
            return Err(SasError::NotYetValid);
        }
        if at > self.expiry {
            return Err(SasError::Expired);
        }
        if !self.permissions.allows(op) {
            return Err(SasError::PermissionDenied(op));
        }
        Ok(())
    }
}

/// Account SAS query (`ss=b`, `srt=c`, `sp=c`) that authorizes creating a
/// container with the account key, without the leading `?`.
pub fn container_create_query(
    account: &str,
    key_b64: &str,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
    protocol: &str,
) -> SasResult<String> {
    let st = format_time(truncate_secs(start));
    let se = format_time(truncate_secs(expiry));
    let to_sign = account_string_to_sign(account, "c", "b", "c", &st, &se, protocol);
    let sig = hmac_b64(key_b64, &to_sign)?;

    Ok([
        ("sv", SAS_VERSION),
        ("ss", "b"),
        ("srt", "c"),
        ("sp", "c"),
        ("st", st.as_str()),
        ("se", se.as_str()),
        ("spr", protocol),
        ("sig", sig.as_str()),
    ]
    .iter()
    .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
    .collect::<Vec<_>>()
    .join("&"))
}

/// Account SAS layout: one line per field, trailing newline after `ses`.
fn account_string_to_sign(
    account: &str,
    sp: &str,
    ss: &str,
    srt: &str,
    st: &str,
    se: &str,
    spr: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n\n{}\n{}\n\n",
        account, sp, ss, srt, st, se, spr, SAS_VERSION
    )
}

fn hmac_b64(key_b64: &str, message: &str) -> SasResult<String> {
    let key = decode_key(key_b64)?;
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SasError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// `/blob/{account}/{container}/{blob}`
pub fn canonical_resource(account: &str, container: &str, blob: &str) -> String {
    format!("/blob/{}/{}/{}", account, container, blob)
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_time(value: &str) -> SasResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SasError::Malformed(format!("bad timestamp `{}`", value)))
}

fn truncate_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

fn decode_key(key_b64: &str) -> SasResult<Vec<u8>> {
    general_purpose::STANDARD
        .decode(key_b64.trim())
        .map_err(|_| SasError::InvalidKey)
}
