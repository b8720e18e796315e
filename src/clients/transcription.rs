//! HTTP client for the external transcription service.
//!
//! The service exposes two endpoints:
//! - `POST {base}/transcribe` accepts a [`TranscriptionRequest`] and answers
//!   with a job handle.
//! - `GET {base}/jobs/{job_id}` reports a [`JobStatus`].

use crate::models::transcription::{JobStatus, TranscriptionRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// The service could not be reached or timed out.
    #[error("transcription service unreachable: {0}")]
    Unreachable(String),
    /// The service answered with a non-success status.
    #[error("transcription service returned {0}")]
    Rejected(StatusCode),
    #[error("transcription job `{0}` not found")]
    UnknownJob(String),
    #[error("invalid transcription service response: {0}")]
    InvalidResponse(String),
    #[error("transcription client configuration error: {0}")]
    Config(String),
}

pub type TranscriptionResult<T> = Result<T, TranscriptionError>;

#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Submit a job and return its handle.
    async fn submit(&self, request: &TranscriptionRequest) -> TranscriptionResult<String>;

    async fn status(&self, job_id: &str) -> TranscriptionResult<JobStatus>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(alias = "id", alias = "jobId")]
    job_id: String,
}

pub struct HttpTranscriptionClient {
    http: Client,
    base_url: String,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: impl Into<String>) -> TranscriptionResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TranscriptionError::Config(e.to_string()))?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn submit(&self, request: &TranscriptionRequest) -> TranscriptionResult<String> {
        let url = format!("{}/transcribe", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TranscriptionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // The body may echo the upload URLs; it is not logged.
            tracing::warn!(lecture_id = %request.lecture_id, status = %status, "transcription submit rejected");
            return Err(TranscriptionError::Rejected(status));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::InvalidResponse(e.to_string()))?;
        if body.job_id.trim().is_empty() {
            return Err(TranscriptionError::InvalidResponse("empty job id".into()));
        }
        Ok(body.job_id)
    }

    async fn status(&self, job_id: &str) -> TranscriptionResult<JobStatus> {
        let url = format!("{}/jobs/{}", self.base_url, urlencoding::encode(job_id));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TranscriptionError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| TranscriptionError::InvalidResponse(e.to_string())),
            StatusCode::NOT_FOUND => Err(TranscriptionError::UnknownJob(job_id.to_string())),
            status => {
                tracing::warn!(job_id = %job_id, status = %status, "transcription status lookup failed");
                Err(TranscriptionError::Rejected(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transcription::JobState;
    use mockito::Matcher;

    fn request() -> TranscriptionRequest {
        TranscriptionRequest {
            lecture_id: "L1".into(),
            video_url: "https://acct/videos/a.mp4?sig=r".into(),
            blob_name: "a.mp4".into(),
            transcript_upload_url: "https://acct/videos/a.json?sig=w".into(),
            captions_upload_url: "https://acct/videos/a.vtt?sig=w".into(),
            language: "en".into(),
        }
    }

    #[tokio::test]
    async fn submit_posts_request_and_returns_job_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transcribe")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "lecture_id": "L1",
                "blob_name": "a.mp4",
                "language": "en"
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"job_id":"job-7","status":"queued"}"#)
            .create_async()
            .await;

        let client = HttpTranscriptionClient::new(format!("{}/", server.url())).unwrap();
        assert_eq!(client.submit(&request()).await.unwrap(), "job-7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn submit_failure_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/transcribe")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = HttpTranscriptionClient::new(server.url()).unwrap();
        let err = client.submit(&request()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Rejected(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn status_parses_job_and_missing_job() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jobs/job-7")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"completed","captions_blob_name":"a.vtt"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/jobs/gone")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpTranscriptionClient::new(server.url()).unwrap();
        let status = client.status("job-7").await.unwrap();
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.captions_blob_name.as_deref(), Some("a.vtt"));

        assert!(matches!(
            client.status("gone").await.unwrap_err(),
            TranscriptionError::UnknownJob(id) if id == "gone"
        ));
    }
}
