//! Access grant shapes returned to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation a grant authorizes. Exactly one per grant.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GrantPermission {
    #[default]
    Read,
    Write,
}

impl fmt::Display for GrantPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantPermission::Read => f.write_str("read"),
            GrantPermission::Write => f.write_str("write"),
        }
    }
}

/// A URL granting access to one stored object.
///
/// `ttl_minutes` and `expires_at` are `None` when the URL is not time-bounded:
/// local mode, or a plain URL handed out after a signing failure.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccessGrant {
    pub url: String,
    pub permission: GrantPermission,
    pub ttl_minutes: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether `url` carries a signed token.
    pub signed: bool,
}
