//! Asset lifecycle: ingest, lookup, encoding reconciliation, deletion and
//! access grants.
//!
//! Ordering rules:
//! - bytes are stored before the record is created, and an object whose
//!   record could not be written is removed again;
//! - on delete the object goes first (best effort), then the record.

use crate::{
    clients::TranscriptionError,
    clock::Clock,
    metrics::Metrics,
    models::{
        asset::{Asset, EncodingStatus, EncodingUpdate, NewAsset},
        grant::{AccessGrant, GrantPermission},
    },
    services::asset_repository::{AssetRepository, EncodingUpdateOutcome},
    storage::{Grant, Storage, StorageBackend, StorageError},
};
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Declared MIME types accepted at ingress.
pub const ALLOWED_MIME_TYPES: [&str; 7] = [
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/mpeg",
    "video/ogg",
];

pub const MIN_GRANT_TTL_MINUTES: u32 = 1;
pub const MAX_GRANT_TTL_MINUTES: u32 = 24 * 60;

const MAX_LECTURE_ID_LEN: usize = 128;
const MAX_ORIGINAL_NAME_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage unavailable")]
    Storage(#[source] StorageError),
    #[error("transcription service failure")]
    Orchestration(#[from] TranscriptionError),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl AssetError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            AssetError::Validation(_) => "validation",
            AssetError::NotFound(_) => "not_found",
            AssetError::Conflict(_) => "conflict",
            AssetError::Storage(_) => "storage_unavailable",
            AssetError::Orchestration(_) => "orchestration",
            AssetError::Database(_) => "internal",
        }
    }
}

impl From<StorageError> for AssetError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => AssetError::NotFound(format!("object `{}` not found", name)),
            StorageError::InvalidObjectName(name) => {
                AssetError::Validation(format!("invalid object name `{}`", name))
            }
            other => AssetError::Storage(other),
        }
    }
}

pub type AssetResult<T> = Result<T, AssetError>;

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub lecture_id: String,
    pub user_id: Option<String>,
    pub original_filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    /// Gateway base used for local-mode URLs, without trailing slash.
    pub public_base_url: String,
    pub initial_status: EncodingStatus,
    pub default_grant_ttl_minutes: u32,
    pub max_upload_bytes: usize,
}

#[derive(Clone)]
pub struct AssetService {
    repo: AssetRepository,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    settings: Arc<AssetSettings>,
}

impl AssetService {
    pub fn new(
        repo: AssetRepository,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        settings: AssetSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            clock,
            metrics,
            settings: Arc::new(settings),
        }
    }

    pub fn repo(&self) -> &AssetRepository {
        &self.repo
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Reject anything outside the allow-list. Parameters such as
    /// `; codecs=...` are ignored.
    pub fn validate_mime(mime_type: &str) -> AssetResult<String> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if ALLOWED_MIME_TYPES.contains(&essence.as_str()) {
            Ok(essence)
        } else {
            Err(AssetError::Validation(format!(
                "unsupported content type `{}`",
                mime_type
            )))
        }
    }

    pub fn validate_lecture_id(lecture_id: &str) -> AssetResult<()> {
        let ok = !lecture_id.is_empty()
            && lecture_id.len() <= MAX_LECTURE_ID_LEN
            && lecture_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !lecture_id.starts_with('.');
        if ok {
            Ok(())
        } else {
            Err(AssetError::Validation(format!(
                "invalid lecture id `{}`",
                lecture_id
            )))
        }
    }

    /// Gateway URL for an object served from local storage.
    pub fn public_url(&self, object_name: &str) -> String {
        format!(
            "{}/media/{}",
            self.settings.public_base_url,
            urlencoding::encode(object_name)
        )
    }

    /// Store the bytes, then record the asset.
    #[instrument(skip(self, upload), fields(lecture_id = %upload.lecture_id, size = upload.data.len()))]
    pub async fn ingest(&self, upload: VideoUpload) -> AssetResult<Asset> {
        Self::validate_lecture_id(&upload.lecture_id)?;
        let mime_type = Self::validate_mime(&upload.mime_type)?;
        if upload.data.is_empty() {
            return Err(AssetError::Validation("uploaded file is empty".into()));
        }
        if upload.data.len() > self.settings.max_upload_bytes {
            return Err(AssetError::Validation(format!(
                "file exceeds the {} byte limit",
                self.settings.max_upload_bytes
            )));
        }

        let object_name = self.object_name(&upload.lecture_id, &upload.original_filename);
        let size = upload.data.len();
        let stored = self
            .storage
            .put(&object_name, upload.data, &mime_type)
            .await?;

        let blob_url = stored
            .url
            .clone()
            .unwrap_or_else(|| self.public_url(&stored.object_name));
        let new = NewAsset {
            lecture_id: upload.lecture_id,
            user_id: upload.user_id.filter(|u| !u.trim().is_empty()),
            filename: stored.object_name.clone(),
            original_filename: upload.original_filename,
            file_size: size as i64,
            mime_type,
            container: stored.container.clone(),
            blob_name: stored.object_name.clone(),
            blob_url,
            encoding_status: self.settings.initial_status,
        };

        match self.repo.create(&new, self.clock.now()).await {
            Ok(asset) => {
                self.metrics.observe_upload(size as u64);
                info!(asset_id = %asset.id, blob = %asset.blob_name, "video stored");
                Ok(asset)
            }
            Err(err) => {
                tracing::error!(blob = %stored.object_name, error = %err, "recording asset failed, removing object");
                if let Err(cleanup) = self
                    .storage
                    .delete(&stored.container, &stored.object_name)
                    .await
                {
                    warn!(blob = %stored.object_name, error = %cleanup, "orphan object left behind");
                }
                Err(AssetError::Database(err))
            }
        }
    }

    /// `{lecture}_{yyyyMMddHHmmssSSS}_{8 hex}_{sanitized original}`
    fn object_name(&self, lecture_id: &str, original_filename: &str) -> String {
        let stamp = self.clock.now().format("%Y%m%d%H%M%S%3f");
        let unique = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}_{}",
            lecture_id,
            stamp,
            &unique[..8],
            sanitize_original(original_filename)
        )
    }

    pub async fn get(&self, id: Uuid) -> AssetResult<Asset> {
        self.repo
            .find(id)
            .await?
            .ok_or_else(|| asset_not_found(id))
    }

    pub async fn list(&self, lecture_id: &str) -> AssetResult<Vec<Asset>> {
        Ok(self.repo.list_by_lecture(lecture_id).await?)
    }

    pub async fn latest(&self, lecture_id: &str) -> AssetResult<Asset> {
        self.repo
            .latest_for_lecture(lecture_id)
            .await?
            .ok_or_else(|| {
                AssetError::NotFound(format!("no video found for lecture `{}`", lecture_id))
            })
    }

    /// Remove the object (best effort), then the record.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> AssetResult<()> {
        let asset = self.get(id).await?;
        if let Err(err) = self.storage.delete(&asset.container, &asset.blob_name).await {
            warn!(asset_id = %id, blob = %asset.blob_name, error = %err, "physical delete failed, removing record anyway");
        }
        self.repo.delete(id).await?;
        info!(asset_id = %id, "video deleted");
        Ok(())
    }

    #[instrument(skip(self, update))]
    pub async fn update_encoding(&self, id: Uuid, update: EncodingUpdate) -> AssetResult<Asset> {
        if update.is_empty() {
            return Err(AssetError::Validation("no encoding fields to update".into()));
        }
        if matches!(update.duration_seconds, Some(d) if !d.is_finite() || d < 0.0) {
            return Err(AssetError::Validation(
                "duration_seconds must be a non-negative number".into(),
            ));
        }
        match self
            .repo
            .update_encoding(id, &update, self.clock.now())
            .await?
        {
            EncodingUpdateOutcome::Updated(asset) => {
                info!(
                    asset_id = %id,
                    status = %asset.encoding_status,
                    terminal = asset.encoding_status.is_terminal(),
                    "encoding state updated"
                );
                Ok(asset)
            }
            EncodingUpdateOutcome::NotFound => Err(asset_not_found(id)),
            EncodingUpdateOutcome::Rejected { current } => Err(AssetError::Conflict(format!(
                "video {} is already {}",
                id, current
            ))),
        }
    }

    /// Grant on a stored asset; `ttl_minutes` defaults to the configured value
    /// and is clamped to one day.
    pub async fn access_grant(
        &self,
        id: Uuid,
        ttl_minutes: Option<u32>,
        permission: GrantPermission,
    ) -> AssetResult<AccessGrant> {
        let asset = self.get(id).await?;
        let ttl = ttl_minutes.unwrap_or(self.settings.default_grant_ttl_minutes);
        Ok(self
            .grant_for(&asset.container, &asset.blob_name, ttl, permission)
            .await)
    }

    /// Grant on any object name in a container, resolving local mode to the
    /// gateway URL.
    pub async fn grant_for(
        &self,
        container: &str,
        object_name: &str,
        ttl_minutes: u32,
        permission: GrantPermission,
    ) -> AccessGrant {
        let ttl_minutes = ttl_minutes.clamp(MIN_GRANT_TTL_MINUTES, MAX_GRANT_TTL_MINUTES);
        let grant = self
            .storage
            .grant(
                container,
                object_name,
                Duration::minutes(i64::from(ttl_minutes)),
                permission,
            )
            .await;
        match grant {
            Grant::Signed { url, expires_at } => AccessGrant {
                url,
                permission,
                ttl_minutes: Some(ttl_minutes),
                expires_at: Some(expires_at),
                signed: true,
            },
            Grant::Plain { url } => AccessGrant {
                url,
                permission,
                ttl_minutes: None,
                expires_at: None,
                signed: false,
            },
            Grant::Unbounded => AccessGrant {
                url: self.public_url(object_name),
                permission,
                ttl_minutes: None,
                expires_at: None,
                signed: false,
            },
        }
    }

    pub fn backend(&self) -> StorageBackend {
        self.storage.backend()
    }
}

fn asset_not_found(id: Uuid) -> AssetError {
    AssetError::NotFound(format!("video {} not found", id))
}

/// Safe, bounded rendition of a client-supplied filename.
fn sanitize_original(original: &str) -> String {
    let cleaned: String = sanitize_filename::sanitize(original)
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "video".into();
    }
    if cleaned.len() <= MAX_ORIGINAL_NAME_LEN {
        return cleaned.to_string();
    }
    // Keep the extension when truncating.
    let mut cut = MAX_ORIGINAL_NAME_LEN;
    while !cleaned.is_char_boundary(cut) {
        cut -= 1;
    }
    match cleaned.rfind('.') {
        Some(dot) if cleaned.len() - dot <= 10 => {
            let ext = &cleaned[dot..];
            let mut head = MAX_ORIGINAL_NAME_LEN - ext.len();
            while !cleaned.is_char_boundary(head) {
                head -= 1;
            }
            format!("{}{}", &cleaned[..head], ext)
        }
        _ => cleaned[..cut].to_string(),
    }
}
