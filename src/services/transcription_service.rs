//! Drives transcription of a lecture's latest video through the external
//! service.
//!
//! The service never receives storage credentials: it gets one read grant on
//! the source video and one write grant per output artifact.

use crate::{
    clients::TranscriptionClient,
    clock::Clock,
    models::{
        asset::Asset,
        grant::GrantPermission,
        transcription::{
            JobState, TranscriptionRequest, TranscriptionStarted, TranscriptionState,
            TranscriptionStatus,
        },
    },
    services::asset_service::{AssetError, AssetResult, AssetService},
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    pub default_language: String,
    /// Lifetime of the grants handed to the service with a job.
    pub job_grant_ttl_minutes: u32,
    /// Lifetime of the read grants on finished artifacts.
    pub result_grant_ttl_minutes: u32,
}

#[derive(Clone)]
pub struct TranscriptionService {
    assets: AssetService,
    client: Arc<dyn TranscriptionClient>,
    settings: Arc<TranscriptionSettings>,
}

impl TranscriptionService {
    pub fn new(
        assets: AssetService,
        client: Arc<dyn TranscriptionClient>,
        settings: TranscriptionSettings,
    ) -> Self {
        Self {
            assets,
            client,
            settings: Arc::new(settings),
        }
    }

    /// Submit a job for the lecture's latest video.
    ///
    /// A job that is still queued, running or already finished is reused
    /// unless `force` is set. A failed job, or one whose status cannot be
    /// read, is submitted again.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        lecture_id: &str,
        language: Option<&str>,
        force: bool,
    ) -> AssetResult<TranscriptionStarted> {
        let language = match language.map(str::trim).filter(|l| !l.is_empty()) {
            Some(lang) if is_language_tag(lang) => lang.to_string(),
            Some(lang) => {
                return Err(AssetError::Validation(format!(
                    "invalid language `{}`",
                    lang
                )));
            }
            None => self.settings.default_language.clone(),
        };
        let asset = self.assets.latest(lecture_id).await?;

        if let (Some(job_id), false) = (asset.transcription_job_id.as_deref(), force) {
            match self.client.status(job_id).await {
                Ok(status) if status.status.is_live_or_done() => {
                    info!(asset_id = %asset.id, job_id = %job_id, state = ?status.status, "reusing transcription job");
                    return Ok(TranscriptionStarted {
                        asset_id: asset.id,
                        job_id: job_id.to_string(),
                        resubmitted: false,
                    });
                }
                Ok(_) => info!(asset_id = %asset.id, job_id = %job_id, "previous job failed, resubmitting"),
                Err(err) => {
                    warn!(asset_id = %asset.id, job_id = %job_id, error = %err, "job status unavailable, resubmitting")
                }
            }
        }

        let request = self.job_request(&asset, language).await;
        let job_id = self.client.submit(&request).await?;

        // Only a successful submission is recorded.
        let now = self.assets.clock().now();
        self.assets
            .repo()
            .set_transcription_job(asset.id, &job_id, now)
            .await?
            .ok_or_else(|| AssetError::NotFound(format!("video {} not found", asset.id)))?;

        info!(asset_id = %asset.id, job_id = %job_id, "transcription submitted");
        Ok(TranscriptionStarted {
            asset_id: asset.id,
            job_id,
            resubmitted: true,
        })
    }

    async fn job_request(&self, asset: &Asset, language: String) -> TranscriptionRequest {
        let ttl = self.settings.job_grant_ttl_minutes;
        let (transcript_name, captions_name) = output_names(&asset.blob_name);
        let video = self
            .assets
            .grant_for(&asset.container, &asset.blob_name, ttl, GrantPermission::Read)
            .await;
        let transcript = self
            .assets
            .grant_for(&asset.container, &transcript_name, ttl, GrantPermission::Write)
            .await;
        let captions = self
            .assets
            .grant_for(&asset.container, &captions_name, ttl, GrantPermission::Write)
            .await;

        TranscriptionRequest {
            lecture_id: asset.lecture_id.clone(),
            video_url: video.url,
            blob_name: asset.blob_name.clone(),
            transcript_upload_url: transcript.url,
            captions_upload_url: captions.url,
            language,
        }
    }

    /// Reconcile the external job state of the lecture's latest video.
    #[instrument(skip(self))]
    pub async fn status(&self, lecture_id: &str) -> AssetResult<TranscriptionStatus> {
        let asset = self.assets.latest(lecture_id).await?;
        let Some(job_id) = asset.transcription_job_id.clone() else {
            return Ok(TranscriptionStatus {
                asset_id: asset.id,
                state: TranscriptionState::None,
                job_id: None,
                error: None,
                transcript_url: None,
                captions_url: None,
            });
        };

        let job = self.client.status(&job_id).await?;
        let mut status = TranscriptionStatus {
            asset_id: asset.id,
            state: job.status.into(),
            job_id: Some(job_id),
            error: job.error.clone(),
            transcript_url: None,
            captions_url: None,
        };

        if job.status == JobState::Completed {
            let (transcript_name, captions_name) = output_names(&asset.blob_name);
            let transcript_name = job.transcript_blob_name.unwrap_or(transcript_name);
            let captions_name = job.captions_blob_name.unwrap_or(captions_name);
            let ttl = self.settings.result_grant_ttl_minutes;
            status.transcript_url = Some(
                self.assets
                    .grant_for(&asset.container, &transcript_name, ttl, GrantPermission::Read)
                    .await
                    .url,
            );
            status.captions_url = Some(
                self.assets
                    .grant_for(&asset.container, &captions_name, ttl, GrantPermission::Read)
                    .await
                    .url,
            );
        }
        Ok(status)
    }
}

/// Transcript and caption names derived from the source object name.
pub fn output_names(blob_name: &str) -> (String, String) {
    let stem = match blob_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => blob_name,
    };
    (format!("{}.json", stem), format!("{}.vtt", stem))
}

/// BCP 47-ish: letters, digits and hyphens, at most 35 chars.
fn is_language_tag(lang: &str) -> bool {
    lang.len() <= 35 && lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
