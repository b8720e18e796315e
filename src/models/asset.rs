//! Represents one uploaded video and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Encoding state of an asset.
///
/// `Completed` and `Failed` are terminal: once recorded, an update may only
/// re-assert the same value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EncodingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EncodingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingStatus::Pending => "pending",
            EncodingStatus::Processing => "processing",
            EncodingStatus::Completed => "completed",
            EncodingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EncodingStatus::Completed | EncodingStatus::Failed)
    }
}

impl Default for EncodingStatus {
    fn default() -> Self {
        EncodingStatus::Pending
    }
}

impl fmt::Display for EncodingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(EncodingStatus::Pending),
            "processing" => Ok(EncodingStatus::Processing),
            "completed" => Ok(EncodingStatus::Completed),
            "failed" => Ok(EncodingStatus::Failed),
            other => Err(format!("unknown encoding status `{}`", other)),
        }
    }
}

/// A stored video asset.
///
/// The struct holds the metadata only; the bytes live in the storage backend
/// under `(container, blob_name)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Asset {
    /// Unique identifier, generated at creation and never reused.
    pub id: Uuid,

    /// Grouping id the asset belongs to.
    pub lecture_id: String,

    /// Optional uploader.
    pub user_id: Option<String>,

    /// System-generated stored filename (unique per upload).
    pub filename: String,

    /// Filename as supplied by the client. Untrusted.
    pub original_filename: String,

    /// Size in bytes.
    pub file_size: i64,

    /// Declared MIME type, validated at ingress.
    pub mime_type: String,

    /// Container (bucket) holding the object.
    pub container: String,

    /// Object name inside `container`.
    pub blob_name: String,

    /// Resolvable URL of the object. In local mode this is the gateway URL.
    pub blob_url: String,

    pub encoding_status: EncodingStatus,

    pub hls_url: Option<String>,

    pub duration_seconds: Option<f64>,

    pub resolution: Option<String>,

    /// Handle returned by the transcription service, if a job was submitted.
    pub transcription_job_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Bumped on every mutation.
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a freshly stored object.
#[derive(Clone, Debug)]
pub struct NewAsset {
    pub lecture_id: String,
    pub user_id: Option<String>,
    pub filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub container: String,
    pub blob_name: String,
    pub blob_url: String,
    pub encoding_status: EncodingStatus,
}

/// Partial encoding update. Absent fields are left untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EncodingUpdate {
    #[serde(default)]
    pub encoding_status: Option<EncodingStatus>,
    #[serde(default)]
    pub hls_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl EncodingUpdate {
    pub fn is_empty(&self) -> bool {
        self.encoding_status.is_none()
            && self.hls_url.is_none()
            && self.duration_seconds.is_none()
            && self.resolution.is_none()
    }
}
