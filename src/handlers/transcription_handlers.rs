use crate::{
    AppState,
    errors::AppError,
    models::transcription::{TranscriptionStarted, TranscriptionStatus},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

/// Optional body of the start request.
#[derive(Debug, Default, Deserialize)]
pub struct StartTranscription {
    pub language: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// `POST /lectures/{lecture_id}/transcription`: 202 with the job handle.
pub async fn start_transcription(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    body: Option<Json<StartTranscription>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.unwrap_or_default();
    let started: TranscriptionStarted = state
        .transcription
        .start(&lecture_id, req.language.as_deref(), req.force)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

pub async fn transcription_status(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
) -> Result<Json<TranscriptionStatus>, AppError> {
    Ok(Json(state.transcription.status(&lecture_id).await?))
}
