//! Transcription job shapes exchanged with the transcription service and
//! reported to clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job request sent to the transcription service.
///
/// The service reads the video through `video_url` and writes its two
/// artifacts through the upload URLs; it never sees storage credentials.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptionRequest {
    pub lecture_id: String,
    pub video_url: String,
    pub blob_name: String,
    pub transcript_upload_url: String,
    pub captions_upload_url: String,
    pub language: String,
}

/// State of an external job as reported by the transcription service.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "running", alias = "in_progress")]
    Processing,
    #[serde(alias = "succeeded", alias = "done")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl JobState {
    /// States for which a fresh submission would duplicate work.
    pub fn is_live_or_done(&self) -> bool {
        !matches!(self, JobState::Failed)
    }
}

/// Status payload from the transcription service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JobStatus {
    #[serde(alias = "state")]
    pub status: JobState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub transcript_blob_name: Option<String>,
    #[serde(default)]
    pub captions_blob_name: Option<String>,
}

/// Client-facing transcription state. `None` means no job was ever requested.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionState {
    None,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<JobState> for TranscriptionState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => TranscriptionState::Queued,
            JobState::Processing => TranscriptionState::Processing,
            JobState::Completed => TranscriptionState::Completed,
            JobState::Failed => TranscriptionState::Failed,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptionStatus {
    pub asset_id: Uuid,
    pub state: TranscriptionState,
    pub job_id: Option<String>,
    pub error: Option<String>,
    /// Readable URL of the structured transcript, once completed.
    pub transcript_url: Option<String>,
    /// Readable URL of the caption track, once completed.
    pub captions_url: Option<String>,
}

/// Result of starting (or re-using) a transcription job.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptionStarted {
    pub asset_id: Uuid,
    pub job_id: String,
    /// False when an existing live or finished job was re-used.
    pub resubmitted: bool,
}
